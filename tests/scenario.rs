//! End-to-end delivery: feed list → provisioning → poll cycles against a
//! mock HTTP server → channel file contents.

use std::fs;
use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rssm::channel::{provision, FeedChannel, MarkerStrategy};
use rssm::daemon::{run_cycle, PollOptions};
use rssm::feed::{list, parse_feed_list, Fetcher, Flattener};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RSS_TWO_ITEMS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Tech News</title>
    <link>http://a.example/</link>
    <description>Daily tech</description>
    <item>
      <title>Newer story</title>
      <link>http://a.example/2</link>
      <media:thumbnail url="http://a.example/2.png"/>
    </item>
    <item>
      <title>Older story</title>
      <link>http://a.example/1</link>
      <description><![CDATA[Some <b>markup</b> here]]></description>
    </item>
  </channel>
</rss>"#;

const ATOM_ONE_ENTRY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Blog</title>
  <id>urn:blog</id>
  <entry>
    <title>Hello</title>
    <link rel="alternate" href="http://b.example/hello"/>
    <id>urn:blog:1</id>
  </entry>
</feed>"#;

fn options() -> PollOptions {
    PollOptions {
        interval: Duration::from_secs(600),
        marker: MarkerStrategy::Link,
        flattener: Flattener::new(["media"]),
        max_concurrent: 1,
    }
}

fn fetcher() -> Fetcher {
    Fetcher::new(Duration::from_secs(5), 1024 * 1024).unwrap()
}

async fn serve(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("Content-Type", "application/xml"),
        )
        .mount(server)
        .await;
}

fn setup(dir: &Path, feed_list: &str) -> Vec<FeedChannel> {
    let list = list::validate(parse_feed_list(feed_list));
    provision(dir, &list.feeds).unwrap()
}

fn read(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap()
}

#[tokio::test]
async fn test_two_cycles_deliver_each_item_once_oldest_first() {
    let server = MockServer::start().await;
    serve(&server, "/rss.xml", RSS_TWO_ITEMS).await;

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("r");
    let mut feeds = setup(&dir, &format!("tech {}/rss.xml\n", server.uri()));

    assert!(dir.join("tech").is_file());
    assert!(dir.join("tech desc").is_file());

    let first = run_cycle(&mut feeds, &fetcher(), &options()).await;
    assert_eq!(first.items_delivered, 2);

    let expected = "\
title: Older story
link: http://a.example/1
description: Some <b>markup</b> here
ITEMS
title: Newer story
link: http://a.example/2
ITEMS
";
    assert_eq!(read(&dir, "tech"), expected);
    assert_eq!(
        read(&dir, "tech desc"),
        "title: Tech News\nlink: http://a.example/\ndescription: Daily tech\n"
    );

    let second = run_cycle(&mut feeds, &fetcher(), &options()).await;
    assert_eq!(second.items_delivered, 0);
    assert_eq!(read(&dir, "tech"), expected);
}

#[tokio::test]
async fn test_restart_does_not_redeliver() {
    let server = MockServer::start().await;
    serve(&server, "/rss.xml", RSS_TWO_ITEMS).await;

    let tmp = tempfile::tempdir().unwrap();
    let feed_list = format!("tech {}/rss.xml\n", server.uri());

    let mut feeds = setup(tmp.path(), &feed_list);
    run_cycle(&mut feeds, &fetcher(), &options()).await;
    drop(feeds);
    let before = read(tmp.path(), "tech");

    // A fresh process reopens the same channels
    let mut feeds = setup(tmp.path(), &feed_list);
    let summary = run_cycle(&mut feeds, &fetcher(), &options()).await;
    assert_eq!(summary.items_delivered, 0);
    assert_eq!(read(tmp.path(), "tech"), before);
}

#[tokio::test]
async fn test_rss_and_atom_feeds_side_by_side() {
    let server = MockServer::start().await;
    serve(&server, "/rss.xml", RSS_TWO_ITEMS).await;
    serve(&server, "/atom.xml", ATOM_ONE_ENTRY).await;

    let tmp = tempfile::tempdir().unwrap();
    let feed_list = format!(
        "# two feeds\ntech {uri}/rss.xml\n\"my blog\" {uri}/atom.xml   # quoted tag\n",
        uri = server.uri()
    );
    let mut feeds = setup(tmp.path(), &feed_list);
    assert_eq!(feeds.len(), 2);

    let summary = run_cycle(&mut feeds, &fetcher(), &options()).await;
    assert_eq!(summary.feeds_ok, 2);
    assert_eq!(summary.items_delivered, 3);

    assert_eq!(
        read(tmp.path(), "my blog"),
        "title: Hello\nlink: http://b.example/hello\nid: urn:blog:1\nITEMS\n"
    );
    assert_eq!(read(tmp.path(), "my blog desc"), "title: Blog\nid: urn:blog\n");
}

#[tokio::test]
async fn test_malformed_document_skips_feed_only() {
    let server = MockServer::start().await;
    serve(&server, "/rss.xml", RSS_TWO_ITEMS).await;
    serve(&server, "/broken.xml", "<rss><channel><item><title>x</channel>").await;

    let tmp = tempfile::tempdir().unwrap();
    let feed_list = format!(
        "broken {uri}/broken.xml\ntech {uri}/rss.xml\n",
        uri = server.uri()
    );
    let mut feeds = setup(tmp.path(), &feed_list);

    let summary = run_cycle(&mut feeds, &fetcher(), &options()).await;
    assert_eq!(summary.feeds_failed, 1);
    assert_eq!(summary.items_delivered, 2);
    assert_eq!(read(tmp.path(), "broken"), "");
}
