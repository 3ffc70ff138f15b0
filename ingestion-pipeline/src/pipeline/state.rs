use state_machines::state_machine;

state_machine! {
    name: IngestMachine,
    state: IngestState,
    initial: Ready,
    states: [Ready, Resolved, Indexed, Finalized, Failed],
    events {
        resolve { transition: { from: Ready, to: Resolved } }
        index { transition: { from: Resolved, to: Indexed } }
        finalize { transition: { from: Indexed, to: Finalized } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Resolved, to: Failed }
            transition: { from: Indexed, to: Failed }
            transition: { from: Finalized, to: Failed }
        }
    }
}

pub fn ready() -> IngestMachine<(), Ready> {
    IngestMachine::new(())
}
