//! Record model for scraped Cambridge Core pages.
//!
//! Every finished record serializes as one flat JSON object: the shared base fields, the
//! variant-specific fields, and a `kind` tag. Sinks consume this shape.

use serde::{Deserialize, Serialize};

/// Fields shared by book chapters and articles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordBase {
    pub title: String,
    /// Raw body HTML from the online-view endpoint. Empty until the body fetch completes.
    pub content: String,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    /// Page range for book chapters, source entry for articles.
    pub source: Option<String>,
    pub chapter: Option<String>,
    pub published: Option<String>,
    pub published_online: Option<String>,
    pub doi: Option<String>,
}

/// One chapter of a multi-chapter book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    #[serde(flatten)]
    pub base: RecordBase,
    pub info: Option<String>,
    pub subjects: Vec<String>,
    pub isbn: Option<String>,
}

impl BookRecord {
    /// Deep copy of this (pending) book record specialized for one chapter.
    ///
    /// The receiver is left untouched; the returned record is independent of it and of any
    /// sibling chapter.
    pub fn for_chapter(&self, chapter_title: &str, source: Option<String>) -> BookRecord {
        let mut chapter = self.clone();
        chapter.base.title = format!("{} (({}))", self.base.title, chapter_title);
        chapter.base.chapter = Some(chapter_title.to_string());
        chapter.base.source = source;
        chapter
    }
}

/// A single article page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    #[serde(flatten)]
    pub base: RecordBase,
}

/// Finished (or in-flight) output record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Book(BookRecord),
    Article(ArticleRecord),
}

impl Record {
    pub fn base(&self) -> &RecordBase {
        match self {
            Record::Book(b) => &b.base,
            Record::Article(a) => &a.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut RecordBase {
        match self {
            Record::Book(b) => &mut b.base,
            Record::Article(a) => &mut a.base,
        }
    }

    /// True once the body fetch has populated `content`.
    pub fn is_complete(&self) -> bool {
        !self.base().content.is_empty()
    }
}

impl From<BookRecord> for Record {
    fn from(book: BookRecord) -> Self {
        Record::Book(book)
    }
}

impl From<ArticleRecord> for Record {
    fn from(article: ArticleRecord) -> Self {
        Record::Article(article)
    }
}
