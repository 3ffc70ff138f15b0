pub mod page_extraction;
