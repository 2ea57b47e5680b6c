use crate::extract::{builder, ContentExpectation, Extraction, ExtractError, Extractor, Schema};
use serde::Deserialize;
use std::sync::Arc;

const FIELDS: [&str; 5] = [
    "id_igreja",
    "nome_localidade",
    "setor",
    "cidade",
    "texto_completo",
];

#[derive(Debug, Deserialize)]
struct LocalityItem {
    #[serde(default)]
    text: String,
}

/// Extracts a locality from the `filtra_igreja_setor` JSON lookup
///
/// The endpoint answers `[{"text": "NAME - BR-SP-REGION-CITY"}]`. Only
/// localities whose text mentions one of the filter terms and one of the
/// sector terms (case-insensitive) are kept.
pub struct LocalitiesExtractor {
    schema: Arc<Schema>,
    filter_terms: Vec<String>,
    sector_terms: Vec<String>,
}

impl LocalitiesExtractor {
    pub fn new(filter_terms: Vec<String>, sector_terms: Vec<String>) -> Self {
        Self {
            schema: Schema::new(&FIELDS),
            filter_terms: filter_terms.iter().map(|t| t.to_uppercase()).collect(),
            sector_terms: sector_terms.iter().map(|t| t.to_uppercase()).collect(),
        }
    }

    fn matches(&self, text: &str) -> bool {
        let upper = text.to_uppercase();
        let any = |terms: &[String]| terms.is_empty() || terms.iter().any(|t| upper.contains(t));
        any(&self.filter_terms) && any(&self.sector_terms)
    }
}

/// Splits `NAME - COUNTRY-STATE-REGION-CITY` into (name, sector, city)
fn split_locality(text: &str) -> (String, String, String) {
    let Some((name, path)) = text.split_once(" - ") else {
        return (text.trim().to_string(), String::new(), String::new());
    };

    let parts: Vec<&str> = path.trim().split('-').map(str::trim).collect();
    match parts.len() {
        n if n >= 4 => (
            name.trim().to_string(),
            format!("{}-{}-{}", parts[0], parts[1], parts[2]),
            parts[3].to_string(),
        ),
        3 => (
            name.trim().to_string(),
            parts[..2].join("-"),
            parts[2].to_string(),
        ),
        _ => (text.trim().to_string(), String::new(), String::new()),
    }
}

impl Extractor for LocalitiesExtractor {
    fn id(&self) -> &str {
        "localities"
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn expects(&self) -> ContentExpectation {
        ContentExpectation::Json
    }

    fn min_body_size(&self) -> Option<usize> {
        Some(2)
    }

    fn extract(
        &self,
        target: u64,
        body: &[u8],
        _content_type: Option<&str>,
    ) -> Result<Extraction, ExtractError> {
        let items: Vec<LocalityItem> =
            serde_json::from_slice(body).map_err(|e| ExtractError::Malformed(e.to_string()))?;

        let Some(text) = items.first().map(|item| item.text.trim()) else {
            return Ok(Extraction::Filtered);
        };
        if text.is_empty() || !self.matches(text) {
            return Ok(Extraction::Filtered);
        }

        let (name, sector, city) = split_locality(text);
        let record = builder(&self.schema)
            .set("id_igreja", target.to_string())?
            .set("nome_localidade", name)?
            .set("setor", sector)?
            .set("cidade", city)?
            .set("texto_completo", text)?
            .finish()?;

        Ok(Extraction::Rows(vec![record]))
    }
}
