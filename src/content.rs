use crate::error::AppError;
use crate::models::{Collection, ContentRecord, Destination, Highlight, RawDocument, Story};
use askama::Template;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

const FIRESTORE_API_BASE: &str = "https://firestore.googleapis.com/v1";

/// Read-only source of the three page collections.
#[async_trait]
pub trait ContentStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, collection: Collection) -> Result<Vec<ContentRecord>, AppError>;
}

/// Firestore REST listing (`GET .../documents/<collection>`).
pub struct FirestoreStore {
    client: Client,
    base_url: String,
    project_id: String,
}

impl FirestoreStore {
    pub fn new(client: Client, project_id: String, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.unwrap_or_else(|| FIRESTORE_API_BASE.to_string()),
            project_id,
        }
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/{}",
            self.base_url.trim_end_matches('/'),
            self.project_id,
            collection.as_str()
        )
    }

    /// Unwraps Firestore's typed value envelope (`{"stringValue": ..}` etc.)
    /// into plain JSON.
    fn flatten_value(value: &Value) -> Value {
        let Some(obj) = value.as_object() else {
            return value.clone();
        };
        if let Some(s) = obj.get("stringValue") {
            return s.clone();
        }
        if let Some(raw) = obj.get("integerValue") {
            // Int64 values arrive as strings.
            return raw
                .as_str()
                .and_then(|s| s.parse::<i64>().ok())
                .map(Value::from)
                .unwrap_or_else(|| raw.clone());
        }
        for key in ["doubleValue", "booleanValue", "timestampValue", "referenceValue"] {
            if let Some(v) = obj.get(key) {
                return v.clone();
            }
        }
        if obj.contains_key("nullValue") {
            return Value::Null;
        }
        if let Some(arr) = obj.get("arrayValue") {
            let items = arr
                .get("values")
                .and_then(Value::as_array)
                .map(|vs| vs.iter().map(Self::flatten_value).collect())
                .unwrap_or_default();
            return Value::Array(items);
        }
        if let Some(map) = obj.get("mapValue") {
            return Value::Object(Self::flatten_fields(map.get("fields")));
        }
        Value::Null
    }

    fn flatten_fields(fields: Option<&Value>) -> Map<String, Value> {
        fields
            .and_then(Value::as_object)
            .map(|f| {
                f.iter()
                    .map(|(k, v)| (k.clone(), Self::flatten_value(v)))
                    .filter(|(_, v)| !v.is_null())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parse_documents(body: &Value) -> Vec<RawDocument> {
        body.get("documents")
            .and_then(Value::as_array)
            .map(|docs| {
                docs.iter()
                    .filter_map(|doc| {
                        let name = doc.get("name").and_then(Value::as_str)?;
                        let id = name.rsplit('/').next()?.to_string();
                        Some(RawDocument {
                            id,
                            fields: Self::flatten_fields(doc.get("fields")),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContentStore for FirestoreStore {
    fn name(&self) -> &'static str {
        "firestore"
    }

    async fn fetch(&self, collection: Collection) -> Result<Vec<ContentRecord>, AppError> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self.client.get(self.collection_url(collection));
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token)]);
            }

            let body: Value = req.send().await?.error_for_status()?.json().await?;
            out.extend(type_documents(collection, Self::parse_documents(&body)));

            page_token = body
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(ToString::to_string);
            if page_token.is_none() {
                break;
            }
        }

        debug!(collection = collection.as_str(), count = out.len(), "fetched collection");
        Ok(out)
    }
}

/// Collections from a local JSON file:
/// `{ "stories": [ { "id": "..", "fields": { .. } } ], .. }`.
pub struct FileStore {
    documents: HashMap<Collection, Vec<RawDocument>>,
}

impl FileStore {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let documents: HashMap<Collection, Vec<RawDocument>> = serde_json::from_str(raw)?;
        Ok(Self { documents })
    }
}

#[async_trait]
impl ContentStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn fetch(&self, collection: Collection) -> Result<Vec<ContentRecord>, AppError> {
        let docs = self
            .documents
            .get(&collection)
            .map(|docs| docs.as_slice())
            .unwrap_or_default();
        Ok(type_documents(collection, docs.iter().cloned()))
    }
}

#[derive(Template)]
#[template(path = "cards/highlight.html")]
struct HighlightCard<'a> {
    card: &'a Highlight,
}

#[derive(Template)]
#[template(path = "cards/destination.html")]
struct DestinationCard<'a> {
    card: &'a Destination,
    short_name: &'a str,
}

#[derive(Template)]
#[template(path = "cards/story.html")]
struct StoryCard<'a> {
    card: &'a Story,
    category: &'a str,
}

pub fn render_record(record: &ContentRecord) -> Result<String, AppError> {
    let html = match record {
        ContentRecord::Highlight(card) => HighlightCard { card }.render()?,
        ContentRecord::Destination(card) => DestinationCard {
            card,
            short_name: card.name.split(',').next().unwrap_or_default(),
        }
        .render()?,
        ContentRecord::Story(card) => StoryCard {
            card,
            category: card.category.as_deref().unwrap_or_default(),
        }
        .render()?,
    };
    Ok(html)
}

/// Types raw documents, dropping (and logging) any that cannot be read so
/// the rest of the collection still renders.
fn type_documents(
    collection: Collection,
    docs: impl IntoIterator<Item = RawDocument>,
) -> Vec<ContentRecord> {
    docs.into_iter()
        .filter_map(|doc| {
            let id = doc.id.clone();
            ContentRecord::from_document(collection, doc)
                .map_err(|err| {
                    warn!(
                        collection = collection.as_str(),
                        %id,
                        error = %err,
                        "skipping unreadable document"
                    );
                })
                .ok()
        })
        .collect()
}

/// Markup of one page region. Starts as the static fallback and is only
/// replaced when the store returns at least one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub fragments: Vec<String>,
}

impl Region {
    pub fn from_static(markup: &str) -> Self {
        Self {
            fragments: vec![markup.to_string()],
        }
    }

    /// Returns whether the region was replaced. On error the static
    /// markup is left in place.
    pub fn load(&mut self, records: &[ContentRecord]) -> Result<bool, AppError> {
        if records.is_empty() {
            return Ok(false);
        }
        self.fragments = records
            .iter()
            .map(render_record)
            .collect::<Result<_, _>>()?;
        Ok(true)
    }

    pub fn markup(&self) -> String {
        self.fragments.join("\n")
    }
}

fn open_marker(collection: Collection) -> String {
    format!("<!-- wayfarer:{} -->", collection.as_str())
}

fn close_marker(collection: Collection) -> String {
    format!("<!-- /wayfarer:{} -->", collection.as_str())
}

/// Byte range of the markup between a collection's region markers.
fn region_bounds(page: &str, collection: Collection) -> Option<(usize, usize)> {
    let open = open_marker(collection);
    let start = page.find(&open)? + open.len();
    let end = start + page[start..].find(&close_marker(collection))?;
    Some((start, end))
}

/// An HTML page template with `<!-- wayfarer:<collection> -->` regions.
pub struct Page {
    template: String,
    regions: Vec<(Collection, Region)>,
}

impl Page {
    pub fn parse(template: String) -> Self {
        let regions = Collection::ALL
            .iter()
            .filter_map(|c| {
                let (start, end) = region_bounds(&template, *c)?;
                Some((*c, Region::from_static(&template[start..end])))
            })
            .collect();
        Self { template, regions }
    }

    fn region_mut(&mut self, collection: Collection) -> Option<&mut Region> {
        self.regions
            .iter_mut()
            .find(|(c, _)| *c == collection)
            .map(|(_, r)| r)
    }

    pub fn render(&self) -> String {
        let mut out = self.template.clone();
        for (collection, region) in &self.regions {
            if let Some((start, end)) = region_bounds(&out, *collection) {
                out.replace_range(start..end, &region.markup());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub replaced: Vec<Collection>,
    pub kept_static: Vec<Collection>,
    pub failed: Vec<Collection>,
}

/// Fetches every collection the page has a region for, in page load order.
/// A failing collection is logged and keeps its static markup.
pub async fn load_page(store: &dyn ContentStore, page: &mut Page) -> LoadReport {
    let mut report = LoadReport::default();

    for collection in Collection::ALL {
        let Some(region) = page.region_mut(collection) else {
            debug!(collection = collection.as_str(), "page has no region, skipping");
            continue;
        };

        let loaded = match store.fetch(collection).await {
            Ok(records) => {
                debug!(
                    collection = collection.as_str(),
                    ids = ?records.iter().map(ContentRecord::id).collect::<Vec<_>>(),
                    "records fetched"
                );
                region.load(&records)
            }
            Err(err) => Err(err),
        };

        match loaded {
            Ok(true) => report.replaced.push(collection),
            Ok(false) => report.kept_static.push(collection),
            Err(err) => {
                warn!(
                    store = store.name(),
                    collection = collection.as_str(),
                    error = %err,
                    "failed to load collection, keeping static markup"
                );
                report.failed.push(collection);
            }
        }
    }

    info!(
        replaced = report.replaced.len(),
        kept = report.kept_static.len(),
        failed = report.failed.len(),
        "content load finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEMPLATE: &str = "<section><div class=\"stories-grid\"><!-- wayfarer:stories --><p>static story</p><!-- /wayfarer:stories --></div></section>";

    fn story(id: &str, title: &str) -> ContentRecord {
        ContentRecord::Story(Story {
            id: id.into(),
            title: title.into(),
            description: "desc".into(),
            image_url: "img.jpg".into(),
            category: Some("Adventure".into()),
        })
    }

    #[test]
    fn empty_collection_leaves_static_markup() {
        let mut region = Region::from_static("<p>static story</p>");
        assert!(!region.load(&[]).expect("load"));
        assert_eq!(region.markup(), "<p>static story</p>");
    }

    #[test]
    fn records_replace_markup_one_fragment_each_in_order() {
        let mut region = Region::from_static("<p>static story</p>");
        let records = [story("a", "First"), story("b", "Second"), story("c", "Third")];
        assert!(region.load(&records).expect("load"));
        assert_eq!(region.fragments.len(), 3);
        assert!(region.fragments[0].contains("<h3>First</h3>"));
        assert!(region.fragments[1].contains("<h3>Second</h3>"));
        assert!(region.fragments[2].contains("<h3>Third</h3>"));
        assert!(!region.markup().contains("static story"));
    }

    #[test]
    fn destination_card_links_by_id_and_shortens_name() {
        let html = render_record(&ContentRecord::Destination(Destination {
            id: "abc123".into(),
            name: "Santorini, Greece".into(),
            description: "Sunsets".into(),
            image_url: "s.jpg".into(),
            tags: vec!["Islands".into(), "Romance".into()],
        }))
        .expect("render card");
        assert!(html.contains("href=\"destination.html?id=abc123\""));
        assert!(html.contains("Explore Santorini</a>"));
        assert!(html.contains("<span class=\"tag\">Islands</span><span class=\"tag\">Romance</span>"));
    }

    #[test]
    fn highlight_card_escapes_fields() {
        let html = render_record(&ContentRecord::Highlight(Highlight {
            id: "h1".into(),
            title: "Fish & <Chips>".into(),
            description: String::new(),
            image_url: "x.jpg".into(),
        }))
        .expect("render card");
        assert!(html.contains("<h3>Fish &amp; &lt;Chips&gt;</h3>"));
        assert!(html.contains("highlight.html?id=h1"));
    }

    #[test]
    fn page_splices_only_loaded_regions() {
        let mut page = Page::parse(TEMPLATE.to_string());
        assert!(page.region_mut(Collection::Highlights).is_none());
        assert_eq!(page.render(), TEMPLATE);

        page.region_mut(Collection::Stories)
            .expect("stories region")
            .load(&[story("a", "Only")])
            .expect("load");
        let rendered = page.render();
        assert!(rendered.contains("<h3>Only</h3>"));
        assert!(!rendered.contains("static story"));
        assert!(rendered.starts_with("<section><div class=\"stories-grid\"><!-- wayfarer:stories -->"));
        assert!(rendered.ends_with("<!-- /wayfarer:stories --></div></section>"));
    }

    #[tokio::test]
    async fn load_page_keeps_static_markup_for_empty_collection() {
        let store = FileStore::from_json(r#"{ "stories": [] }"#).expect("store");
        let mut page = Page::parse(TEMPLATE.to_string());

        let report = load_page(&store, &mut page).await;
        assert_eq!(report.kept_static, vec![Collection::Stories]);
        assert_eq!(page.render(), TEMPLATE);
    }

    #[tokio::test]
    async fn load_page_replaces_with_store_order() {
        let store = FileStore::from_json(
            &json!({
                "stories": [
                    { "id": "s3", "fields": { "title": "Gamma" } },
                    { "id": "s1", "fields": { "title": "Alpha" } },
                    { "id": "s2", "fields": { "title": "Beta" } }
                ]
            })
            .to_string(),
        )
        .expect("store");
        let mut page = Page::parse(TEMPLATE.to_string());

        let report = load_page(&store, &mut page).await;
        assert_eq!(report.replaced, vec![Collection::Stories]);
        let region = page.region_mut(Collection::Stories).expect("region");
        assert_eq!(region.fragments.len(), 3);
        let rendered = page.render();
        let gamma = rendered.find("Gamma").expect("gamma");
        let alpha = rendered.find("Alpha").expect("alpha");
        let beta = rendered.find("Beta").expect("beta");
        assert!(gamma < alpha && alpha < beta);
    }

    #[tokio::test]
    async fn null_tags_render_a_card_without_chips() {
        let store = FileStore::from_json(
            &json!({
                "destinations": [
                    { "id": "d1", "fields": { "name": "Rome, Italy", "tags": null } },
                    { "id": "d2", "fields": { "name": "Kyoto, Japan", "tags": ["Temples"] } }
                ]
            })
            .to_string(),
        )
        .expect("store");

        let records = store.fetch(Collection::Destinations).await.expect("fetch");
        assert_eq!(records.len(), 2);
        let rome = render_record(&records[0]).expect("render card");
        assert!(rome.contains("Explore Rome</a>"));
        assert!(rome.contains("<div class=\"destination-tags\"></div>"));
        let kyoto = render_record(&records[1]).expect("render card");
        assert!(kyoto.contains("<span class=\"tag\">Temples</span>"));
    }

    #[test]
    fn story_card_shows_category_and_escapes_attributes() {
        let html = render_record(&ContentRecord::Story(Story {
            id: "s1".into(),
            title: "\"Quoted\" trip".into(),
            description: "d".into(),
            image_url: "a.jpg".into(),
            category: None,
        }))
        .expect("render card");
        assert!(html.contains("alt=\"&quot;Quoted&quot; trip\""));
        assert!(html.contains("<span class=\"story-category\"></span>"));
        assert!(html.contains("Read Full Story"));
    }

    #[test]
    fn firestore_documents_are_flattened() {
        let docs = FirestoreStore::parse_documents(&json!({
            "documents": [{
                "name": "projects/p/databases/(default)/documents/destinations/bali01",
                "fields": {
                    "name": { "stringValue": "Bali, Indonesia" },
                    "rating": { "integerValue": "5" },
                    "tags": { "arrayValue": { "values": [
                        { "stringValue": "Beach" }, { "stringValue": "Temples" }
                    ] } },
                    "extra": { "nullValue": null }
                }
            }]
        }));
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "bali01");
        assert_eq!(docs[0].fields["name"], "Bali, Indonesia");
        assert_eq!(docs[0].fields["rating"], 5);
        assert_eq!(docs[0].fields["tags"], json!(["Beach", "Temples"]));
        assert!(!docs[0].fields.contains_key("extra"));
    }

    #[tokio::test]
    async fn firestore_fetch_follows_page_tokens() {
        let server = MockServer::start().await;
        let collection_path = "/projects/travel/databases/(default)/documents/highlights";
        Mock::given(method("GET"))
            .and(path(collection_path))
            .and(query_param("pageToken", "next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [{
                    "name": "projects/travel/databases/(default)/documents/highlights/h2",
                    "fields": { "title": { "stringValue": "Second" } }
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(collection_path))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [{
                    "name": "projects/travel/databases/(default)/documents/highlights/h1",
                    "fields": { "title": { "stringValue": "First" } }
                }],
                "nextPageToken": "next"
            })))
            .mount(&server)
            .await;

        let store = FirestoreStore::new(Client::new(), "travel".into(), Some(server.uri()));
        let records = store.fetch(Collection::Highlights).await.expect("fetch");
        let ids: Vec<&str> = records.iter().map(ContentRecord::id).collect();
        assert_eq!(ids, vec!["h1", "h2"]);
    }

    #[tokio::test]
    async fn failed_collection_keeps_static_markup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = FirestoreStore::new(Client::new(), "travel".into(), Some(server.uri()));
        let mut page = Page::parse(TEMPLATE.to_string());
        let report = load_page(&store, &mut page).await;
        assert_eq!(report.failed, vec![Collection::Stories]);
        assert_eq!(page.render(), TEMPLATE);
    }
}
