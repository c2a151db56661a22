#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use docgen_server::db::{Collection, DocumentStore, StoreError};
use docgen_server::jobs::{JobOrchestrator, PipelineSettings};
use docgen_server::publish::UrlPolicy;
use docgen_server::render::{expected_pdf_path, PdfConverter, RenderError};
use docgen_server::storage::{ObjectStorage, StorageError, UploadOptions};
use docgen_server::AppState;
use serde_json::{json, Map, Value};

pub const OUTPUT_BUCKET: &str = "generated";
pub const TEMPLATE_BUCKET: &str = "templates";

/// In-memory document store that records every update it receives.
#[derive(Default)]
pub struct MemoryDocumentStore {
    records: Mutex<HashMap<(Collection, String), Value>>,
    updates: Mutex<Vec<(Collection, String, Map<String, Value>)>>,
    failing_updates: Mutex<Vec<Collection>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: Collection, id: &str, record: Value) {
        self.records
            .lock()
            .unwrap()
            .insert((collection, id.to_string()), record);
    }

    pub fn record(&self, collection: Collection, id: &str) -> Option<Value> {
        self.records
            .lock()
            .unwrap()
            .get(&(collection, id.to_string()))
            .cloned()
    }

    pub fn updates(&self) -> Vec<(Collection, String, Map<String, Value>)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn updates_to(&self, collection: Collection) -> Vec<Map<String, Value>> {
        self.updates()
            .into_iter()
            .filter(|(c, _, _)| *c == collection)
            .map(|(_, _, fields)| fields)
            .collect()
    }

    /// Job status values written, in order.
    pub fn status_history(&self, collection: Collection) -> Vec<String> {
        self.updates_to(collection)
            .iter()
            .filter_map(|fields| fields.get("status").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    pub fn fail_updates_to(&self, collection: Collection) {
        self.failing_updates.lock().unwrap().push(collection);
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.record(collection, id))
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        if self.failing_updates.lock().unwrap().contains(&collection) {
            return Err(StoreError::Database("connection reset".to_string()));
        }

        let mut records = self.records.lock().unwrap();
        let Some(Value::Object(existing)) = records.get_mut(&(collection, id.to_string())) else {
            return Err(StoreError::Missing {
                collection,
                id: id.to_string(),
            });
        };
        for (key, value) in &fields {
            existing.insert(key.clone(), value.clone());
        }
        self.updates
            .lock()
            .unwrap()
            .push((collection, id.to_string(), fields));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub bucket: String,
    pub path: String,
    pub options: UploadOptions,
    pub bytes: Vec<u8>,
}

/// In-memory object storage with switchable access capabilities.
pub struct MemoryObjectStorage {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    uploads: Mutex<Vec<RecordedUpload>>,
    made_public: Mutex<Vec<String>>,
    pub public_bucket: bool,
    pub signing: bool,
    pub signing_fails: bool,
    pub uniform: bool,
}

impl MemoryObjectStorage {
    /// Private bucket with a signing credential.
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            uploads: Mutex::new(Vec::new()),
            made_public: Mutex::new(Vec::new()),
            public_bucket: false,
            signing: true,
            signing_fails: false,
            uniform: true,
        }
    }

    pub fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), path.to_string()), bytes);
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn made_public(&self) -> Vec<String> {
        self.made_public.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn download(&self, bucket: &str, path: &str, destination: &Path) -> Result<(), StorageError> {
        let bytes = self
            .object(bucket, path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        std::fs::write(destination, bytes)?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        source: &Path,
        options: &UploadOptions,
    ) -> Result<(), StorageError> {
        let bytes = std::fs::read(source)?;
        self.put(bucket, path, bytes.clone());
        self.uploads.lock().unwrap().push(RecordedUpload {
            bucket: bucket.to_string(),
            path: path.to_string(),
            options: options.clone(),
            bytes,
        });
        Ok(())
    }

    async fn is_public(&self, _bucket: &str, path: &str) -> Result<bool, StorageError> {
        Ok(self.public_bucket || self.made_public.lock().unwrap().iter().any(|p| p == path))
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("https://storage.test/public/{bucket}/{path}")
    }

    fn can_sign(&self) -> bool {
        self.signing
    }

    async fn sign_url(
        &self,
        bucket: &str,
        path: &str,
        ttl: Duration,
        _allowed_origins: &[String],
    ) -> Result<String, StorageError> {
        if self.signing_fails {
            return Err(StorageError::PermissionDenied(path.to_string()));
        }
        Ok(format!(
            "https://storage.test/sign/{bucket}/{path}?expires={}",
            ttl.as_secs()
        ))
    }

    async fn uniform_access(&self, _bucket: &str) -> Result<bool, StorageError> {
        Ok(self.uniform)
    }

    async fn make_public(&self, _bucket: &str, path: &str) -> Result<(), StorageError> {
        self.made_public.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

/// How [`FakeConverter`] behaves when asked to convert.
#[derive(Debug, Clone, Copy)]
pub enum ConverterMode {
    /// Writes a small PDF next to the input.
    Produce,
    /// Exits "successfully" without leaving a PDF behind.
    NoOutput,
    /// Exits with a non-zero code.
    Crash,
    Unavailable,
}

pub struct FakeConverter {
    mode: ConverterMode,
    calls: AtomicUsize,
    input_dirs: Mutex<Vec<PathBuf>>,
}

impl FakeConverter {
    pub fn new(mode: ConverterMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
            input_dirs: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Directories the converted inputs lived in, one per call.
    pub fn input_dirs(&self) -> Vec<PathBuf> {
        self.input_dirs.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PdfConverter for FakeConverter {
    async fn convert(&self, input: &Path) -> Result<PathBuf, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(dir) = input.parent() {
            assert!(dir.is_dir(), "converter input directory is missing");
            self.input_dirs.lock().unwrap().push(dir.to_path_buf());
        }
        let expected = expected_pdf_path(input);
        match self.mode {
            ConverterMode::Produce => {
                std::fs::write(&expected, b"%PDF-1.7 fake").map_err(RenderError::Spawn)?;
                Ok(expected)
            }
            ConverterMode::NoOutput => Err(RenderError::RenderIncomplete(expected)),
            ConverterMode::Crash => Err(RenderError::RenderFailed {
                code: 81,
                stderr: "Error: source file could not be loaded".to_string(),
            }),
            ConverterMode::Unavailable => Err(RenderError::ConverterUnavailable),
        }
    }
}

/// Builds a minimal DOCX package; each paragraph is given as its list of run texts.
pub fn docx_with_runs(paragraphs: &[&[&str]]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|runs| paragraph_xml(runs))
        .collect();
    docx_from_body(&body)
}

/// One single-run paragraph per entry.
pub fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let runs: Vec<[&str; 1]> = paragraphs.iter().map(|text| [*text]).collect();
    let refs: Vec<&[&str]> = runs.iter().map(|run| run.as_slice()).collect();
    docx_with_runs(&refs)
}

pub fn paragraph_xml(runs: &[&str]) -> String {
    let runs: String = runs
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let props = if i % 2 == 1 { "<w:rPr><w:b/></w:rPr>" } else { "" };
            format!(
                "<w:r>{props}<w:t xml:space=\"preserve\">{}</w:t></w:r>",
                escape(text)
            )
        })
        .collect();
    format!("<w:p>{runs}</w:p>")
}

pub fn table_xml(cells: &[&str]) -> String {
    let cells: String = cells
        .iter()
        .map(|text| format!("<w:tc>{}</w:tc>", paragraph_xml(&[text])))
        .collect();
    format!("<w:tbl><w:tr>{cells}</w:tr></w:tbl>")
}

pub fn docx_from_body(body: &str) -> Vec<u8> {
    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
         <w:body>{body}<w:sectPr/></w:body></w:document>"
    );

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("word/styles.xml", STYLES),
        ("word/document.xml", document.as_str()),
    ] {
        writer.start_file(name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn read_part(docx: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(docx)).unwrap();
    let mut content = String::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    content
}

/// Visible text of each paragraph of `word/document.xml`.
pub fn paragraph_texts(docx: &[u8]) -> Vec<String> {
    let xml = read_part(docx, "word/document.xml");
    let tag = regex::Regex::new(r"<[^>]*>").unwrap();
    xml.split("</w:p>")
        .filter(|chunk| chunk.contains("<w:p>") || chunk.contains("<w:p "))
        .map(|chunk| unescape(&tag.replace_all(chunk, "")))
        .collect()
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

const CONTENT_TYPES: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
<Override PartName=\"/word/document.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml\"/>\
</Types>";

pub const STYLES: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<w:styles xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:style w:styleId=\"Normal\"/></w:styles>";

/// A job, form and template ready to be processed.
pub struct Fixture {
    pub documents: Arc<MemoryDocumentStore>,
    pub storage: Arc<MemoryObjectStorage>,
    pub converter: Arc<FakeConverter>,
}

impl Fixture {
    pub fn new(storage: MemoryObjectStorage, mode: ConverterMode) -> Self {
        let documents = MemoryDocumentStore::new();
        documents.insert(
            Collection::Jobs,
            "j1",
            json!({ "formId": "f1", "status": "pending", "createdAt": "2025-03-01T10:00:00Z" }),
        );
        documents.insert(
            Collection::Forms,
            "f1",
            json!({
                "templateId": "t1",
                "officeId": "o1",
                "status": "draft",
                "formData": {
                    "nome": { "value": "Maria Souza", "alias": "Nome" },
                    "cidade": "Recife",
                    "valor": 1500
                }
            }),
        );
        documents.insert(
            Collection::Templates,
            "t1",
            json!({
                "storagePath": "templates/o1/contrato.docx",
                "downloadURL": "https://abc.supabase.co/storage/v1/object/public/templates/templates/o1/contrato.docx",
                "status": "processed"
            }),
        );
        storage.put(
            TEMPLATE_BUCKET,
            "templates/o1/contrato.docx",
            docx_with_runs(&[
                &["Contratante: {{nome}}"],
                &["Cidade: {", "{cid", "ade}}", " - valor {{valor}}"],
                &["Assinatura: {{assinatura}}"],
            ]),
        );

        Self {
            documents: Arc::new(documents),
            storage: Arc::new(storage),
            converter: Arc::new(FakeConverter::new(mode)),
        }
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            output_bucket: OUTPUT_BUCKET.to_string(),
            template_bucket: Some(TEMPLATE_BUCKET.to_string()),
            url_policy: UrlPolicy {
                ttl: Duration::from_secs(3600),
                allowed_origins: vec!["http://localhost:5173".to_string()],
            },
        }
    }

    pub fn orchestrator(&self) -> JobOrchestrator {
        JobOrchestrator::new(
            self.documents.clone(),
            self.storage.clone(),
            self.converter.clone(),
            self.settings(),
        )
    }

    pub fn app_state(&self) -> AppState {
        AppState::from_parts(
            self.documents.clone(),
            self.storage.clone(),
            self.converter.clone(),
            self.settings(),
        )
    }

    pub fn job(&self, id: &str) -> Value {
        self.documents.record(Collection::Jobs, id).unwrap()
    }

    pub fn form(&self, id: &str) -> Value {
        self.documents.record(Collection::Forms, id).unwrap()
    }
}
