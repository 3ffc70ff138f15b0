use std::time::Duration;

use async_trait::async_trait;
use common::{
    error::AppError,
    utils::{
        config::AppConfig,
        indexing::{ChunkMetadata, IndexingClient},
    },
};
use text_splitter::{ChunkCapacity, ChunkConfig, TextSplitter};

use crate::utils::page_extraction::{extract_page, CrawledPage};

/// The pipeline's external calls, behind a trait so tests can stub the
/// network away.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn crawl(&self, url: &str) -> Result<CrawledPage, AppError>;

    async fn index_chunks(
        &self,
        user_id: &str,
        chunks: &[String],
        metadata: &ChunkMetadata,
    ) -> Result<(), AppError>;
}

pub struct DefaultPipelineServices {
    http: reqwest::Client,
    indexing: IndexingClient,
}

impl DefaultPipelineServices {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.crawl_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            indexing: IndexingClient::new(config)?,
        })
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn crawl(&self, url: &str) -> Result<CrawledPage, AppError> {
        extract_page(&self.http, url).await
    }

    async fn index_chunks(
        &self,
        user_id: &str,
        chunks: &[String],
        metadata: &ChunkMetadata,
    ) -> Result<(), AppError> {
        self.indexing.index_for_user(user_id, chunks, metadata).await
    }
}

/// Strip residual markup the readability pass leaves behind: inline HTML
/// tags and runs of blank lines.
pub fn clean_for_indexing(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => cleaned.push(ch),
            _ => {}
        }
    }

    let mut out = String::with_capacity(cleaned.len());
    let mut blank_run = 0usize;
    for line in cleaned.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }

    out.trim().to_string()
}

pub fn prepare_chunks(
    text: &str,
    min_chars: usize,
    max_chars: usize,
    overlap_chars: usize,
) -> Result<Vec<String>, AppError> {
    if min_chars == 0 || max_chars == 0 || min_chars > max_chars {
        return Err(AppError::Validation(
            "invalid chunk bounds; ensure 0 < min <= max".into(),
        ));
    }

    if overlap_chars >= min_chars {
        return Err(AppError::Validation(format!(
            "chunk_min_chars must be greater than the configured overlap of {overlap_chars}"
        )));
    }

    let chunk_capacity = ChunkCapacity::new(min_chars)
        .with_max(max_chars)
        .map_err(|e| AppError::Validation(format!("invalid chunk bounds: {e}")))?;
    let chunk_config = ChunkConfig::new(chunk_capacity)
        .with_overlap(overlap_chars)
        .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?;
    let splitter = TextSplitter::new(chunk_config);

    Ok(splitter.chunks(text).map(str::to_owned).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_for_indexing_strips_tags_and_blank_runs() {
        let input = "Title\n\n\n\n<img src=\"x.png\">Body text\n\n<br/>\nEnd";
        let cleaned = clean_for_indexing(input);
        assert!(!cleaned.contains('<'));
        assert!(!cleaned.contains("\n\n\n"));
        assert!(cleaned.contains("Body text"));
    }

    #[test]
    fn test_prepare_chunks_respects_bounds() {
        let text = "word ".repeat(2_000);
        let chunks = prepare_chunks(&text, 100, 500, 20).expect("chunks");
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 500));
    }

    #[test]
    fn test_prepare_chunks_invalid_bounds() {
        assert!(prepare_chunks("text", 0, 10, 0).is_err());
        assert!(prepare_chunks("text", 20, 10, 0).is_err());
        assert!(prepare_chunks("text", 10, 20, 10).is_err());
    }

    #[test]
    fn test_prepare_chunks_short_text_single_chunk() {
        let chunks = prepare_chunks("a short note", 100, 500, 20).expect("chunks");
        assert_eq!(chunks, vec!["a short note".to_string()]);
    }
}
