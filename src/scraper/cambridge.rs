//! Cambridge Core adapter. Routes pages by URL path, walks listing and book pagination, and
//! extracts one record per book chapter or article. Bodies come from the AJAX online-view
//! service, fetched as a separate request that completes the record.
//!
//! Known limitation: book pagination always requests pages 2..=max, whatever page the crawl
//! entered on. Entering a book on `pageNum=N` skips page 1 and visits page N twice.

use crate::model::{ArticleRecord, BookRecord, Record, RecordBase};
use crate::scraper::error::ScraperError;
use crate::scraper::{
    first_text, last_page_number, nested_text, page_number, parse_selector, resolve_path,
    split_lines, with_page_number, with_path, Output, Page, Request, Spider,
};
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html};
use std::sync::Arc;

/// Cambridge Core host. Its online-view service is always requested over https.
pub const SITE_HOST: &str = "www.cambridge.org";

const LISTING_PREFIX: &str = "/core/what-we-publish";
const DETAIL_PREFIX: &str = "/core/books";
const VIEW_LINK_PATTERN: &str = r"/core/product/(.+)/online-view";
const VIEW_SERVICE_PATH: &str = "/core/services/online-view/get/";

/// Headers that make the body fetch look like the site's own same-origin XHR.
const AJAX_HEADERS: [(&str, &str); 8] = [
    ("accept", "*/*"),
    ("accept-language", "en-US,en;q=0.9"),
    ("cache-control", "no-cache"),
    ("pragma", "no-cache"),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "same-origin"),
    ("x-requested-with", "XMLHttpRequest"),
];

type Out = Output<CambridgeCallback>;

/// Which routine handles a response, with the context it needs.
#[derive(Debug)]
pub enum CambridgeCallback {
    /// Start URL: classify by path.
    Parse,
    /// Extra listing page from the paginator: collect detail links only.
    ListingContents,
    /// Book or article detail page.
    Detail,
    /// Book pagination page sharing the book's metadata snapshot.
    BookPage(Arc<BookRecord>),
    /// Online-view body for a record that is otherwise complete.
    Body(Box<Record>),
}

/// Resolved online-view link: the service URL serving the body and the page to send as referer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewLink {
    pub view_url: Url,
    pub referer: Url,
}

/// Book details entries the extractor understands. Any other label is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetailField {
    PrintPublicationYear,
    OnlinePublicationDate,
    OnlineIsbn,
    Doi,
    Subjects,
}

impl DetailField {
    fn from_label(label: &str) -> Option<Self> {
        match label {
            "print publication year" => Some(DetailField::PrintPublicationYear),
            "online publication date" => Some(DetailField::OnlinePublicationDate),
            "online isbn" => Some(DetailField::OnlineIsbn),
            "doi" => Some(DetailField::Doi),
            "subjects" => Some(DetailField::Subjects),
            _ => None,
        }
    }

    fn apply(self, book: &mut BookRecord, lines: Vec<String>) {
        match self {
            DetailField::PrintPublicationYear => book.base.published = join_lines(&lines),
            DetailField::OnlinePublicationDate => book.base.published_online = join_lines(&lines),
            DetailField::OnlineIsbn => book.isbn = join_lines(&lines),
            DetailField::Doi => book.base.doi = join_lines(&lines),
            DetailField::Subjects => book.subjects = lines,
        }
    }
}

fn join_lines(lines: &[String]) -> Option<String> {
    if lines.is_empty() {
        None
    } else {
        Some(lines.join(" "))
    }
}

/// Details label as written on the page ("Online ISBN:") to lookup form ("online isbn").
fn normalize_label(raw: &str) -> String {
    raw.trim_matches(|c: char| c == ':' || c.is_whitespace())
        .to_lowercase()
}

/// Drop a leading "Publisher:" label (any case) and surrounding whitespace.
pub fn normalize_publisher(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.get(..10) {
        Some(label) if label.eq_ignore_ascii_case("publisher:") => trimmed[10..].trim().to_string(),
        _ => trimmed.to_string(),
    }
}

/// First date is the print (or print-equivalent) date. The second, when exactly two are
/// present, is the online publication date.
pub fn split_published(mut dates: Vec<String>) -> (Option<String>, Option<String>) {
    let online = if dates.len() == 2 { dates.pop() } else { None };
    (dates.into_iter().next(), online)
}

fn missing(what: &'static str, selector: &str, url: &Url) -> ScraperError {
    ScraperError::MissingElement {
        what,
        selector: selector.to_string(),
        url: url.to_string(),
    }
}

/// Joined `li.author` nested text, split into one author per line.
fn authors_from(doc: &Html, selector: &str) -> Result<Vec<String>, ScraperError> {
    let sel = parse_selector(selector)?;
    let joined: String = doc.select(&sel).map(nested_text).collect();
    Ok(split_lines(&joined))
}

/// Build the book-level record (no chapter yet) from a book root page.
fn extract_book(doc: &Html, url: &Url) -> Result<BookRecord, ScraperError> {
    const TITLE: &str = "h1[data-test-id=book-title]";
    let title_sel = parse_selector(TITLE)?;
    let info_sel = parse_selector("li.meta-info")?;
    let details_sel = parse_selector("div.details:not(.main-details) > ul > li")?;
    let label_sel = parse_selector("span:first-child")?;

    let title = doc
        .select(&title_sel)
        .next()
        .and_then(first_text)
        .ok_or_else(|| missing("book title", TITLE, url))?;
    let info = doc.select(&info_sel).next().and_then(first_text);

    let mut book = BookRecord {
        base: RecordBase {
            title,
            authors: authors_from(doc, "li.author")?,
            ..RecordBase::default()
        },
        info,
        ..BookRecord::default()
    };

    for entry in doc.select(&details_sel) {
        let label = match entry.select(&label_sel).next().and_then(first_text) {
            Some(l) => normalize_label(&l),
            None => continue,
        };
        let Some(field) = DetailField::from_label(&label) else {
            tracing::debug!("ignoring book detail {:?} at {}", label, url);
            continue;
        };
        let value: String = entry.text().skip(2).collect();
        field.apply(&mut book, split_lines(&value));
    }

    Ok(book)
}

/// Build an article record (without body) from an article page.
fn extract_article(doc: &Html, url: &Url) -> Result<ArticleRecord, ScraperError> {
    const DATES: &str = "div.chapter .details .published > .date";
    const TITLE: &str = "h1.article-title";
    const PUBLISHER: &str = "ul.overview li.publisher";
    let dates_sel = parse_selector(DATES)?;
    let title_sel = parse_selector(TITLE)?;
    let publisher_sel = parse_selector(PUBLISHER)?;
    let doi_sel = parse_selector("ul.overview li.doi > a.doi")?;
    let source_sel = parse_selector("ul.overview > li.source")?;

    let dates: Vec<String> = doc
        .select(&dates_sel)
        .flat_map(|el| {
            el.children()
                .filter_map(|node| node.value().as_text())
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        })
        .collect();
    let (published, published_online) = split_published(dates);
    let published = published.ok_or_else(|| missing("publication date", DATES, url))?;

    let title = doc
        .select(&title_sel)
        .next()
        .and_then(first_text)
        .ok_or_else(|| missing("article title", TITLE, url))?;
    let publisher = doc
        .select(&publisher_sel)
        .next()
        .and_then(first_text)
        .map(|p| normalize_publisher(&p))
        .ok_or_else(|| missing("publisher", PUBLISHER, url))?;
    let doi = doc
        .select(&doi_sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(String::from);
    // Only an entry tagged exactly "source" counts; other classes on the last item mean it
    // is something else.
    let source = doc
        .select(&source_sel)
        .last()
        .filter(|li| li.value().attr("class") == Some("source"))
        .and_then(first_text);

    Ok(ArticleRecord {
        base: RecordBase {
            title,
            authors: authors_from(doc, "ul.overview li.author")?,
            publisher: Some(publisher),
            source,
            published: Some(published),
            published_online,
            doi,
            ..RecordBase::default()
        },
    })
}

/// Request for the online-view body of `record`.
fn body_request(
    view_url: Url,
    referer: &str,
    record: Record,
) -> Result<Request<CambridgeCallback>, ScraperError> {
    let mut request = Request::new(view_url, CambridgeCallback::Body(Box::new(record)))
        .header("referer", referer)?;
    for (name, value) in AJAX_HEADERS {
        request = request.header(name, value)?;
    }
    Ok(request)
}

/// Cambridge Core spider. Stateless apart from the compiled view-link pattern; all
/// per-book state travels with the requests.
#[derive(Debug)]
pub struct CambridgeSpider {
    view_link: Regex,
}

impl CambridgeSpider {
    pub fn new() -> Result<Self, ScraperError> {
        let view_link = Regex::new(VIEW_LINK_PATTERN).map_err(|e| ScraperError::InvalidPattern {
            pattern: VIEW_LINK_PATTERN.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { view_link })
    }

    /// Find the first online-view link among the action/link lists inside `scope`.
    ///
    /// The service URL sits on the page's origin, port included, except that the Cambridge
    /// Core host is always addressed over https.
    pub fn find_view_link(
        &self,
        scope: ElementRef<'_>,
        page_url: &Url,
    ) -> Result<Option<ViewLink>, ScraperError> {
        let link_sel = parse_selector("ul.file-actions a, ul.links a")?;
        for a in scope.select(&link_sel) {
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            if let Some(caps) = self.view_link.captures(href) {
                let mut view_url =
                    with_path(page_url, &format!("{}{}", VIEW_SERVICE_PATH, &caps[1]));
                if view_url
                    .host_str()
                    .is_some_and(|h| h.eq_ignore_ascii_case(SITE_HOST))
                {
                    // http -> https keeps a special scheme, so this cannot fail.
                    let _ = view_url.set_scheme("https");
                }
                let referer = resolve_path(page_url, href)?;
                return Ok(Some(ViewLink { view_url, referer }));
            }
        }
        Ok(None)
    }

    fn route(&self, page: &Page, doc: &Html) -> Result<Vec<Out>, ScraperError> {
        let path = page.url.path();
        if path.starts_with(LISTING_PREFIX) {
            self.parse_listing(page, doc)
        } else if path.starts_with(DETAIL_PREFIX) {
            self.parse_book_or_article(page, doc)
        } else {
            tracing::warn!("unknown URL path: {}", path);
            Ok(Vec::new())
        }
    }

    /// Listing page: schedule the remaining listing pages, then this page's detail links.
    fn parse_listing(&self, page: &Page, doc: &Html) -> Result<Vec<Out>, ScraperError> {
        let mut out = Vec::new();
        if let Some(max_page) = last_page_number(doc, &page.url)? {
            let current = page_number(&page.url)?;
            tracing::debug!(
                "listing {}: page {} of {}",
                page.url.path(),
                current,
                max_page
            );
            // Nothing follows the last representable page.
            let remaining = current.checked_add(1).map(|next| next..=max_page);
            for n in remaining.into_iter().flatten() {
                let request = Request::new(
                    with_page_number(&page.url, n),
                    CambridgeCallback::ListingContents,
                )
                .dont_filter();
                out.push(Output::Request(request));
            }
        }
        out.extend(self.parse_contents(page, doc)?);
        Ok(out)
    }

    fn parse_contents(&self, page: &Page, doc: &Html) -> Result<Vec<Out>, ScraperError> {
        let link_sel = parse_selector("div.results div.row a.part-link")?;
        let mut out = Vec::new();
        for a in doc.select(&link_sel) {
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            let url = resolve_path(&page.url, href)?;
            out.push(Output::Request(Request::new(url, CambridgeCallback::Detail)));
        }
        tracing::debug!("{} detail links on {}", out.len(), page.url);
        Ok(out)
    }

    fn parse_book_or_article(&self, page: &Page, doc: &Html) -> Result<Vec<Out>, ScraperError> {
        let chapter_sel = parse_selector("div.chapter")?;
        if doc.select(&chapter_sel).next().is_some() {
            self.parse_article(page, doc)
        } else {
            self.parse_book(page, doc, None)
        }
    }

    fn parse_article(&self, page: &Page, doc: &Html) -> Result<Vec<Out>, ScraperError> {
        let article = extract_article(doc, &page.url)?;
        match self.find_view_link(doc.root_element(), &page.url)? {
            Some(view) => Ok(vec![Output::Request(body_request(
                view.view_url,
                view.referer.as_str(),
                article.into(),
            )?)]),
            None => {
                tracing::error!("unable to locate view path for article at {}", page.url);
                Ok(vec![Output::Record(article.into())])
            }
        }
    }

    /// Book page. `pending` is `None` on the book root, where the metadata is extracted and
    /// the other pages are scheduled; every page then yields one record per chapter row.
    fn parse_book(
        &self,
        page: &Page,
        doc: &Html,
        pending: Option<Arc<BookRecord>>,
    ) -> Result<Vec<Out>, ScraperError> {
        let mut out = Vec::new();
        let pending = match pending {
            Some(p) => p,
            None => {
                let book = Arc::new(extract_book(doc, &page.url)?);
                if let Some(max_page) = last_page_number(doc, &page.url)? {
                    tracing::debug!("book {:?}: {} pages", book.base.title, max_page);
                    for n in 2..=max_page {
                        let request = Request::new(
                            with_page_number(&page.url, n),
                            CambridgeCallback::BookPage(Arc::clone(&book)),
                        )
                        .dont_filter();
                        out.push(Output::Request(request));
                    }
                }
                book
            }
        };

        const CHAPTER_LINK: &str = "a";
        let row_sel = parse_selector(".results-listing .overview")?;
        let link_sel = parse_selector(CHAPTER_LINK)?;
        let pages_sel = parse_selector("a .pages")?;
        for row in doc.select(&row_sel) {
            let chapter_title = row
                .select(&link_sel)
                .next()
                .and_then(first_text)
                .ok_or_else(|| missing("chapter link", CHAPTER_LINK, &page.url))?;
            let source = row.select(&pages_sel).next().and_then(first_text);
            let chapter = pending.for_chapter(&chapter_title, source);

            match self.find_view_link(row, &page.url)? {
                Some(view) => out.push(Output::Request(body_request(
                    view.view_url,
                    page.url.as_str(),
                    chapter.into(),
                )?)),
                None => {
                    tracing::error!(
                        "unable to locate view path for chapter {:?} at {}",
                        chapter_title,
                        page.url
                    );
                    out.push(Output::Record(chapter.into()));
                }
            }
        }
        Ok(out)
    }
}

impl Spider for CambridgeSpider {
    type Callback = CambridgeCallback;

    fn start_request(&self, url: Url) -> Request<CambridgeCallback> {
        Request::new(url, CambridgeCallback::Parse)
    }

    fn parse(&self, callback: CambridgeCallback, page: &Page) -> Result<Vec<Out>, ScraperError> {
        match callback {
            CambridgeCallback::Body(mut record) => {
                record.base_mut().content = page.body.clone();
                Ok(vec![Output::Record(*record)])
            }
            CambridgeCallback::Parse => self.route(page, &page.document()),
            CambridgeCallback::ListingContents => self.parse_contents(page, &page.document()),
            CambridgeCallback::Detail => self.parse_book_or_article(page, &page.document()),
            CambridgeCallback::BookPage(pending) => {
                self.parse_book(page, &page.document(), Some(pending))
            }
        }
    }
}
