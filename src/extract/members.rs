use crate::extract::{builder, ContentExpectation, Extraction, ExtractError, Extractor, Schema};
use regex::Regex;
use std::sync::Arc;

const FIELDS: [&str; 7] = [
    "id",
    "nome",
    "igreja_selecionada",
    "cargo_ministerio",
    "nivel",
    "instrumento",
    "tonalidade",
];

/// Extracts a member from its edit page
///
/// Pages without a `nome` input, or with an empty name, are filtered out.
/// The select fields read the text of the `selected` option that follows the
/// select's id.
pub struct MembersExtractor {
    schema: Arc<Schema>,
    nome: Regex,
    igreja: Regex,
    selects: [(&'static str, Regex); 4],
}

impl MembersExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            schema: Schema::new(&FIELDS),
            nome: Regex::new(r#"name="nome"[^>]*value="([^"]*)""#)?,
            igreja: Regex::new(r"igreja_selecionada\s*\(\s*(\d+)\s*\)")?,
            selects: [
                ("cargo_ministerio", selected_option("id_cargo")?),
                ("nivel", selected_option("id_nivel")?),
                ("instrumento", selected_option("id_instrumento")?),
                ("tonalidade", selected_option("id_tonalidade")?),
            ],
        })
    }
}

fn selected_option(select_id: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r#"(?si){}"[^>]*>.*?selected[^>]*>\s*([^<\n]+)"#,
        regex::escape(select_id)
    ))
}

fn capture(regex: &Regex, html: &str) -> String {
    regex
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

impl Extractor for MembersExtractor {
    fn id(&self) -> &str {
        "members"
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn expects(&self) -> ContentExpectation {
        ContentExpectation::Html
    }

    fn extract(
        &self,
        target: u64,
        body: &[u8],
        _content_type: Option<&str>,
    ) -> Result<Extraction, ExtractError> {
        let html = String::from_utf8_lossy(body);

        if !html.contains(r#"name="nome""#) {
            return Ok(Extraction::Filtered);
        }

        let nome = capture(&self.nome, &html);
        if nome.is_empty() {
            return Ok(Extraction::Filtered);
        }

        let mut record = builder(&self.schema)
            .set("id", target.to_string())?
            .set("nome", nome)?
            .set("igreja_selecionada", capture(&self.igreja, &html))?;
        for (field, regex) in &self.selects {
            record = record.set(field, capture(regex, &html))?;
        }

        Ok(Extraction::Rows(vec![record.finish()?]))
    }
}
