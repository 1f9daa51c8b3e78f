use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cambridge_scrape::{
    CambridgeSpider, Engine, EngineOptions, PoliteClient, Record, RecordSink, SinkError,
};

const LISTING_PAGE_1: &str = r#"<!doctype html>
<html><body>
  <ul class="pagination">
    <li><a data-page-number="1">1</a></li>
    <li><a data-page-number="2">2</a></li>
  </ul>
  <div class="results">
    <div class="row"><a class="part-link" href="/core/books/cosmology">Cosmology</a></div>
    <div class="row"><a class="part-link" href="/core/books/on-lattices">On Lattices</a></div>
  </div>
</body></html>
"#;

const LISTING_PAGE_2: &str = r#"<!doctype html>
<html><body>
  <ul class="pagination">
    <li><a data-page-number="1">1</a></li>
    <li><a data-page-number="2">2</a></li>
  </ul>
  <div class="results">
    <div class="row"><a class="part-link" href="/core/books/cosmology#toc">Cosmology again</a></div>
    <div class="row"><a class="part-link" href="/core/books/withdrawn">Withdrawn</a></div>
  </div>
</body></html>
"#;

const BOOK_PAGE_1: &str = r#"<!doctype html>
<html><body>
  <h1 data-test-id="book-title">Cosmology</h1>
  <ul class="meta">
    <li class="meta-info">Cambridge University Press</li>
    <li class="author"><a>Steven Weinberg</a></li>
  </ul>
  <div class="details"><ul>
    <li><span>Print publication year:</span> <span>2008</span></li>
    <li><span>Online ISBN:</span> <span>9780511790553</span></li>
    <li><span>Subjects:</span> <span>Physics
Astronomy</span></li>
  </ul></div>
  <ul class="pagination">
    <li><a data-page-number="1">1</a></li>
    <li><a data-page-number="2">2</a></li>
  </ul>
  <div class="results-listing">
    <div class="overview">
      <a href="/core/books/cosmology/expansion">1 - The Expansion <span class="pages">pp 1-60</span></a>
      <ul class="file-actions"><li><a href="/core/product/CH1/online-view">Read</a></li></ul>
    </div>
  </div>
</body></html>
"#;

const BOOK_PAGE_2: &str = r#"<!doctype html>
<html><body>
  <h1 data-test-id="book-title">Cosmology</h1>
  <ul class="pagination">
    <li><a data-page-number="1">1</a></li>
    <li><a data-page-number="2">2</a></li>
  </ul>
  <div class="results-listing">
    <div class="overview">
      <a href="/core/books/cosmology/cmb">2 - The Microwave Background <span class="pages">pp 61-120</span></a>
      <ul class="links"><li><a href="/core/product/CH2/online-view">Read</a></li></ul>
    </div>
  </div>
</body></html>
"#;

const ARTICLE_PAGE: &str = r#"<!doctype html>
<html><body>
  <div class="chapter"><div class="details">
    <span class="published"><span class="date">2020</span></span>
    <span class="published"><span class="date">2020-05-01</span></span>
  </div></div>
  <h1 class="article-title">On Lattices</h1>
  <ul class="overview">
    <li class="author"><a>Ada Lovelace</a></li>
    <li class="publisher">Publisher: Cambridge University Press</li>
    <li class="source">Journal of Lattices, Volume 3</li>
  </ul>
  <ul class="file-actions"><li><a href="/core/product/ART1/online-view">View</a></li></ul>
</body></html>
"#;

/// Request line plus the referer and x-requested-with headers, as seen by the server.
#[derive(Debug, Clone)]
struct Seen {
    url: String,
    referer: Option<String>,
    requested_with: Option<String>,
}

fn header(request: &tiny_http::Request, name: &'static str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_string())
}

fn spawn_site() -> (
    String,
    Arc<Mutex<Vec<Seen>>>,
    mpsc::Sender<()>,
    thread::JoinHandle<()>,
) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let handle = thread::spawn(move || loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let request = match server.recv_timeout(Duration::from_millis(50)) {
            Ok(Some(req)) => req,
            Ok(None) => continue,
            Err(_) => break,
        };

        let url = request.url().to_string();
        log.lock().expect("request log").push(Seen {
            url: url.clone(),
            referer: header(&request, "Referer"),
            requested_with: header(&request, "X-Requested-With"),
        });

        let (status, body) = match url.as_str() {
            "/core/what-we-publish/books" => (200, LISTING_PAGE_1.to_string()),
            "/core/what-we-publish/books?pageNum=2" => (200, LISTING_PAGE_2.to_string()),
            "/core/books/cosmology" => (200, BOOK_PAGE_1.to_string()),
            "/core/books/cosmology?pageNum=2" => (200, BOOK_PAGE_2.to_string()),
            "/core/books/on-lattices" => (200, ARTICLE_PAGE.to_string()),
            "/core/journals/x" => (200, "<html><body></body></html>".to_string()),
            path if path.starts_with("/core/services/online-view/get/") => {
                let id = &path["/core/services/online-view/get/".len()..];
                (200, format!("<div class=\"body\"><p>Body of {}</p></div>", id))
            }
            _ => (404, "not found".to_string()),
        };

        let content_type =
            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..])
                .expect("build header");
        let response = tiny_http::Response::from_string(body)
            .with_status_code(status)
            .with_header(content_type);
        let _ = request.respond(response);
    });

    (base_url, seen, shutdown_tx, handle)
}

fn local_client() -> PoliteClient {
    PoliteClient::builder()
        .delay_secs(0)
        .timeout_secs(5)
        .retry_count(1)
        .build()
        .expect("build client")
}

fn by_title<'a>(records: &'a [Record], title: &str) -> &'a Record {
    records
        .iter()
        .find(|r| r.base().title == title)
        .unwrap_or_else(|| panic!("no record titled {:?} in {:#?}", title, records))
}

#[test]
fn crawl_listing_emits_complete_book_chapters_and_articles() {
    let (base_url, seen, shutdown_tx, handle) = spawn_site();
    let start = reqwest::Url::parse(&format!("{}/core/what-we-publish/books", base_url))
        .expect("start URL");

    let mut client = local_client();
    let spider = CambridgeSpider::new().expect("spider");
    let options = EngineOptions {
        allowed_hosts: vec!["127.0.0.1".to_string()],
        progress: None,
    };
    let mut records: Vec<Record> = Vec::new();
    let stats = Engine::new(&mut client, spider, options)
        .crawl(start, &mut records)
        .expect("crawl");

    let _ = shutdown_tx.send(());
    handle.join().expect("server thread");

    assert_eq!(records.len(), 3, "{:#?}", records);
    assert!(records.iter().all(Record::is_complete));

    let ch1 = by_title(&records, "Cosmology ((1 - The Expansion))");
    let Record::Book(book) = ch1 else {
        panic!("expected a book record, got {:?}", ch1);
    };
    assert_eq!(book.base.chapter.as_deref(), Some("1 - The Expansion"));
    assert_eq!(book.base.source.as_deref(), Some("pp 1-60"));
    assert_eq!(book.base.authors, vec!["Steven Weinberg".to_string()]);
    assert_eq!(book.base.published.as_deref(), Some("2008"));
    assert_eq!(book.isbn.as_deref(), Some("9780511790553"));
    assert_eq!(book.subjects, vec!["Physics".to_string(), "Astronomy".to_string()]);
    assert!(book.base.content.contains("Body of CH1"));

    // Page 2 chapters carry the metadata extracted on page 1.
    let ch2 = by_title(&records, "Cosmology ((2 - The Microwave Background))");
    let Record::Book(book2) = ch2 else {
        panic!("expected a book record, got {:?}", ch2);
    };
    assert_eq!(book2.isbn.as_deref(), Some("9780511790553"));
    assert_eq!(book2.base.source.as_deref(), Some("pp 61-120"));
    assert!(book2.base.content.contains("Body of CH2"));

    let article = by_title(&records, "On Lattices");
    assert!(matches!(article, Record::Article(_)));
    let base = article.base();
    assert_eq!(base.publisher.as_deref(), Some("Cambridge University Press"));
    assert_eq!(base.published.as_deref(), Some("2020"));
    assert_eq!(base.published_online.as_deref(), Some("2020-05-01"));
    assert_eq!(base.source.as_deref(), Some("Journal of Lattices, Volume 3"));
    assert!(base.content.contains("Body of ART1"));

    // Listing page 2 repeats the book link; the withdrawn book is a 404.
    assert_eq!(stats.records_emitted, 3);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.http_errors, 1);
    assert_eq!(stats.parse_errors, 0);

    let seen = seen.lock().expect("request log").clone();
    let cosmology_fetches = seen
        .iter()
        .filter(|s| s.url == "/core/books/cosmology")
        .count();
    assert_eq!(cosmology_fetches, 1);

    let body_fetches: Vec<&Seen> = seen
        .iter()
        .filter(|s| s.url.starts_with("/core/services/online-view/get/"))
        .collect();
    assert_eq!(body_fetches.len(), 3);
    for fetch in &body_fetches {
        assert_eq!(fetch.requested_with.as_deref(), Some("XMLHttpRequest"));
    }
    let ch1_fetch = body_fetches
        .iter()
        .find(|s| s.url.ends_with("/CH1"))
        .expect("CH1 body fetched");
    assert_eq!(
        ch1_fetch.referer.as_deref(),
        Some(format!("{}/core/books/cosmology", base_url).as_str())
    );
    let art_fetch = body_fetches
        .iter()
        .find(|s| s.url.ends_with("/ART1"))
        .expect("ART1 body fetched");
    assert_eq!(
        art_fetch.referer.as_deref(),
        Some(format!("{}/core/product/ART1/online-view", base_url).as_str())
    );
}

/// Sink that fails on the first record.
struct BrokenSink;

impl RecordSink for BrokenSink {
    fn write_record(&mut self, _record: &Record) -> Result<(), SinkError> {
        Err(SinkError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "output closed",
        )))
    }
}

#[test]
fn sink_failure_stops_the_crawl() {
    let (base_url, seen, shutdown_tx, handle) = spawn_site();
    let start =
        reqwest::Url::parse(&format!("{}/core/books/on-lattices", base_url)).expect("start URL");

    let mut client = local_client();
    let spider = CambridgeSpider::new().expect("spider");
    let options = EngineOptions {
        allowed_hosts: Vec::new(),
        progress: None,
    };
    let result = Engine::new(&mut client, spider, options).crawl(start, &mut BrokenSink);

    let _ = shutdown_tx.send(());
    handle.join().expect("server thread");

    assert!(result.is_err());
    assert_eq!(seen.lock().expect("request log").len(), 2);
}

#[test]
fn unknown_path_yields_nothing() {
    let (base_url, _seen, shutdown_tx, handle) = spawn_site();
    let start = reqwest::Url::parse(&format!("{}/core/journals/x", base_url)).expect("start URL");

    let mut client = local_client();
    let spider = CambridgeSpider::new().expect("spider");
    let mut records: Vec<Record> = Vec::new();
    let progress_calls = std::cell::Cell::new(0u32);
    let progress = |_: &cambridge_scrape::CrawlStats| progress_calls.set(progress_calls.get() + 1);
    let options = EngineOptions {
        allowed_hosts: Vec::new(),
        progress: Some(&progress),
    };
    let stats = Engine::new(&mut client, spider, options)
        .crawl(start, &mut records)
        .expect("crawl");

    let _ = shutdown_tx.send(());
    handle.join().expect("server thread");

    assert!(records.is_empty());
    assert_eq!(stats.pages_fetched, 1);
    assert_eq!(stats.http_errors + stats.parse_errors, 0);
    assert_eq!(progress_calls.get(), 1);
}
