//! Document formats and the read-only format catalog.
//!
//! A [`DocumentFormat`] tells the engine how to *load* a file of that type
//! (load properties, e.g. the CSV separator) and how to *store* a loaded
//! document into it (store properties per [`DocumentFamily`], most
//! importantly the `FilterName` of the export filter). The same target
//! format needs a different export filter depending on what was loaded:
//! a PDF is produced by `writer_pdf_Export` from a text document but by
//! `calc_pdf_Export` from a spreadsheet.
//!
//! The built-in catalog ([`default_registry`]) is embedded at compile time
//! from `document-formats.json` and parsed once. Callers that need extra
//! formats build their own [`FormatRegistry`].

use crate::error::OfficeError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Engine options for load or store, keyed by property name.
///
/// Nested maps (e.g. `FilterData`) are JSON objects.
pub type Properties = BTreeMap<String, Value>;

/// Merges `overrides` on top of `base`; later keys win.
pub fn merge_properties(base: &Properties, overrides: &Properties) -> Properties {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

// ── Families ─────────────────────────────────────────────────────────────

/// Coarse document kind, as reported by the engine for a loaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DocumentFamily {
    Text,
    Spreadsheet,
    Presentation,
    Drawing,
}

impl DocumentFamily {
    pub const ALL: [DocumentFamily; 4] = [
        DocumentFamily::Text,
        DocumentFamily::Spreadsheet,
        DocumentFamily::Presentation,
        DocumentFamily::Drawing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFamily::Text => "TEXT",
            DocumentFamily::Spreadsheet => "SPREADSHEET",
            DocumentFamily::Presentation => "PRESENTATION",
            DocumentFamily::Drawing => "DRAWING",
        }
    }
}

impl fmt::Display for DocumentFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentFamily {
    type Err = OfficeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentFamily::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| OfficeError::Configuration(format!("Unknown document family '{s}'")))
    }
}

// ── Formats ──────────────────────────────────────────────────────────────

/// An immutable document format.
///
/// The first entry of `extensions` is the canonical extension, so the
/// canonical extension is always among the recognised ones. Extensions and
/// media types are stored lower-case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "FormatRecord")]
pub struct DocumentFormat {
    name: String,
    extensions: Vec<String>,
    media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_family: Option<DocumentFamily>,
    #[serde(skip_serializing_if = "Properties::is_empty")]
    load_properties: Properties,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    store_properties: BTreeMap<DocumentFamily, Properties>,
}

/// Wire shape of a catalog entry, validated through the builder.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormatRecord {
    name: String,
    extensions: Vec<String>,
    media_type: String,
    #[serde(default)]
    input_family: Option<DocumentFamily>,
    #[serde(default)]
    load_properties: Properties,
    #[serde(default)]
    store_properties: BTreeMap<DocumentFamily, Properties>,
}

impl TryFrom<FormatRecord> for DocumentFormat {
    type Error = OfficeError;

    fn try_from(r: FormatRecord) -> Result<Self, Self::Error> {
        let mut b = DocumentFormat::builder().name(r.name).media_type(r.media_type);
        for ext in r.extensions {
            b = b.extension(ext);
        }
        if let Some(family) = r.input_family {
            b = b.input_family(family);
        }
        for (k, v) in r.load_properties {
            b = b.load_property(k, v);
        }
        for (family, props) in r.store_properties {
            for (k, v) in props {
                b = b.store_property(family, k, v);
            }
        }
        b.build()
    }
}

impl DocumentFormat {
    pub fn builder() -> DocumentFormatBuilder {
        DocumentFormatBuilder::default()
    }

    /// A builder pre-filled with this format, for deriving variants
    /// (e.g. PDF/A export through extra `FilterData`).
    pub fn to_builder(&self) -> DocumentFormatBuilder {
        DocumentFormatBuilder {
            name: Some(self.name.clone()),
            extensions: self.extensions.clone(),
            media_type: Some(self.media_type.clone()),
            input_family: self.input_family,
            load_properties: self.load_properties.clone(),
            store_properties: self.store_properties.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical extension, without the dot.
    pub fn extension(&self) -> &str {
        &self.extensions[0]
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn has_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Family of documents in this format when used as a source, if known.
    pub fn input_family(&self) -> Option<DocumentFamily> {
        self.input_family
    }

    pub fn load_properties(&self) -> &Properties {
        &self.load_properties
    }

    /// Store properties for a document of `family`, if this format can be
    /// produced from it.
    pub fn store_properties(&self, family: DocumentFamily) -> Option<&Properties> {
        self.store_properties.get(&family)
    }

    pub fn all_store_properties(&self) -> &BTreeMap<DocumentFamily, Properties> {
        &self.store_properties
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (.{})", self.name, self.extension())
    }
}

/// Builder for [`DocumentFormat`].
///
/// Setting a property to `Value::Null` removes it; a family whose store
/// properties become empty is dropped.
#[derive(Debug, Default, Clone)]
pub struct DocumentFormatBuilder {
    name: Option<String>,
    extensions: Vec<String>,
    media_type: Option<String>,
    input_family: Option<DocumentFamily>,
    load_properties: Properties,
    store_properties: BTreeMap<DocumentFamily, Properties>,
}

impl DocumentFormatBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a recognised extension; the first one added is canonical.
    pub fn extension(mut self, ext: impl Into<String>) -> Self {
        let ext = ext.into().trim_start_matches('.').to_ascii_lowercase();
        if !ext.is_empty() && !self.extensions.contains(&ext) {
            self.extensions.push(ext);
        }
        self
    }

    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into().to_ascii_lowercase());
        self
    }

    pub fn input_family(mut self, family: DocumentFamily) -> Self {
        self.input_family = Some(family);
        self
    }

    pub fn load_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        match value.into() {
            Value::Null => {
                self.load_properties.remove(&name);
            }
            v => {
                self.load_properties.insert(name, v);
            }
        }
        self
    }

    pub fn store_property(
        mut self,
        family: DocumentFamily,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        let name = name.into();
        match value.into() {
            Value::Null => {
                if let Some(props) = self.store_properties.get_mut(&family) {
                    props.remove(&name);
                    if props.is_empty() {
                        self.store_properties.remove(&family);
                    }
                }
            }
            v => {
                self.store_properties.entry(family).or_default().insert(name, v);
            }
        }
        self
    }

    pub fn build(self) -> Result<DocumentFormat, OfficeError> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| OfficeError::Configuration("Document format needs a name".into()))?;
        if self.extensions.is_empty() {
            return Err(OfficeError::Configuration(format!(
                "Document format '{name}' needs at least one extension"
            )));
        }
        let media_type = self
            .media_type
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| {
                OfficeError::Configuration(format!("Document format '{name}' needs a media type"))
            })?;
        Ok(DocumentFormat {
            name,
            extensions: self.extensions,
            media_type,
            input_family: self.input_family,
            load_properties: self.load_properties,
            store_properties: self.store_properties,
        })
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

/// Lookup table of formats by extension and by media type.
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    formats: Vec<DocumentFormat>,
    by_extension: HashMap<String, usize>,
    by_media_type: HashMap<String, usize>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON array of formats (the shape of `document-formats.json`).
    pub fn from_json(json: &str) -> Result<Self, OfficeError> {
        let formats: Vec<DocumentFormat> = serde_json::from_str(json)
            .map_err(|e| OfficeError::Configuration(format!("Invalid format catalog: {e}")))?;
        let mut registry = Self::new();
        for f in formats {
            registry.add(f);
        }
        Ok(registry)
    }

    /// Adds `format`; later additions take over its extensions and media type.
    pub fn add(&mut self, format: DocumentFormat) {
        let idx = self.formats.len();
        for ext in format.extensions() {
            self.by_extension.insert(ext.clone(), idx);
        }
        self.by_media_type.insert(format.media_type().to_string(), idx);
        self.formats.push(format);
    }

    pub fn by_extension(&self, ext: &str) -> Option<&DocumentFormat> {
        let key = ext.trim_start_matches('.').to_ascii_lowercase();
        self.by_extension.get(&key).map(|&i| &self.formats[i])
    }

    /// Looks up a media type, ignoring parameters such as `; charset=utf-8`.
    pub fn by_media_type(&self, media_type: &str) -> Option<&DocumentFormat> {
        let key = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.by_media_type.get(&key).map(|&i| &self.formats[i])
    }

    /// Looks up the format of `path` from its extension.
    pub fn for_path(&self, path: &Path) -> Option<&DocumentFormat> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.by_extension(e))
    }

    /// Formats that can be produced from a document of `family`.
    pub fn output_formats(&self, family: DocumentFamily) -> impl Iterator<Item = &DocumentFormat> {
        self.formats
            .iter()
            .filter(move |f| f.store_properties(family).is_some())
    }

    pub fn formats(&self) -> &[DocumentFormat] {
        &self.formats
    }
}

static DEFAULT_REGISTRY: Lazy<FormatRegistry> = Lazy::new(|| {
    FormatRegistry::from_json(include_str!("document-formats.json"))
        .expect("embedded document-formats.json is valid")
});

/// The built-in format catalog.
pub fn default_registry() -> &'static FormatRegistry {
    &DEFAULT_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_first_extension_is_canonical() {
        let f = DocumentFormat::builder()
            .name("Foo Format")
            .extension("foo")
            .extension(".FII")
            .media_type("application/foo")
            .input_family(DocumentFamily::Text)
            .load_property("lprops1_name", "lprops1_value")
            .load_property("lprops2_name", 1)
            .load_property("lprops3_toremove", "bla")
            .load_property("lprops3_toremove", Value::Null)
            .store_property(DocumentFamily::Drawing, "sprops1_name", "sprops1_value")
            .store_property(DocumentFamily::Drawing, "sprops2_toremove", 2)
            .store_property(DocumentFamily::Drawing, "sprops2_toremove", Value::Null)
            .build()
            .unwrap();

        assert_eq!(f.extension(), "foo");
        assert_eq!(f.extensions(), &["foo".to_string(), "fii".to_string()]);
        assert_eq!(f.load_properties().len(), 2);
        assert_eq!(f.load_properties()["lprops2_name"], json!(1));
        let drawing = f.store_properties(DocumentFamily::Drawing).unwrap();
        assert_eq!(drawing.len(), 1);
        assert!(f.store_properties(DocumentFamily::Text).is_none());
    }

    #[test]
    fn removing_last_store_property_drops_family() {
        let f = DocumentFormat::builder()
            .name("Foo")
            .extension("foo")
            .media_type("application/foo")
            .store_property(DocumentFamily::Text, "FilterName", "x")
            .store_property(DocumentFamily::Text, "FilterName", Value::Null)
            .build()
            .unwrap();
        assert!(f.all_store_properties().is_empty());
    }

    #[test]
    fn builder_requires_extension() {
        let err = DocumentFormat::builder()
            .name("Nameless")
            .media_type("application/x")
            .build()
            .unwrap_err();
        assert!(matches!(err, OfficeError::Configuration(_)));
    }

    #[test]
    fn default_catalog_invariants() {
        let reg = default_registry();
        assert!(reg.formats().len() >= 18);
        for f in reg.formats() {
            assert!(f.has_extension(f.extension()), "{f}");
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = default_registry();
        let docx = reg.by_extension("DOCX").unwrap();
        assert_eq!(docx.extension(), "docx");
        assert_eq!(reg.by_extension("jpeg").unwrap().extension(), "jpg");
        assert_eq!(
            reg.by_media_type("text/plain; charset=UTF-8").unwrap().extension(),
            "txt"
        );
        assert!(reg.by_extension("nope").is_none());
    }

    #[test]
    fn pdf_export_filter_depends_on_family() {
        let pdf = default_registry().by_extension("pdf").unwrap();
        assert_eq!(
            pdf.store_properties(DocumentFamily::Text).unwrap()["FilterName"],
            json!("writer_pdf_Export")
        );
        assert_eq!(
            pdf.store_properties(DocumentFamily::Spreadsheet).unwrap()["FilterName"],
            json!("calc_pdf_Export")
        );
    }

    #[test]
    fn output_formats_for_spreadsheet() {
        let exts: Vec<&str> = default_registry()
            .output_formats(DocumentFamily::Spreadsheet)
            .map(|f| f.extension())
            .collect();
        assert!(exts.contains(&"xlsx"));
        assert!(exts.contains(&"pdf"));
        assert!(!exts.contains(&"docx"));
    }

    #[test]
    fn invalid_catalog_entry_is_rejected() {
        let err = FormatRegistry::from_json(r#"[{"name":"x","extensions":[],"mediaType":"a/b"}]"#)
            .unwrap_err();
        assert!(err.to_string().contains("extension"), "got: {err}");
    }

    #[test]
    fn merge_prefers_overrides() {
        let base: Properties = [("A".to_string(), json!(1)), ("B".to_string(), json!(2))].into();
        let over: Properties = [("B".to_string(), json!(3))].into();
        let m = merge_properties(&base, &over);
        assert_eq!(m["A"], json!(1));
        assert_eq!(m["B"], json!(3));
    }

    #[test]
    fn family_parses_case_insensitively() {
        assert_eq!("text".parse::<DocumentFamily>().unwrap(), DocumentFamily::Text);
        assert!("video".parse::<DocumentFamily>().is_err());
    }
}
