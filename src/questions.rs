use hickory_proto::rr::{Name, RecordType};

use crate::config::ConfigError;

/// A single (name, type) pair, prepared once and shared read-only by all
/// workers for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
	pub name: Name,
	pub qtype: RecordType,
}

impl Question {
	fn new(name: Name, qtype: RecordType) -> Self {
		Question { name, qtype }
	}
}

/// Materialize the question list from query tokens.
///
/// A token starting with `@` names a local file (one hostname per line,
/// blank and `#` lines skipped). A token starting with `http://` or
/// `https://` is fetched once and parsed the same way. Anything else is a
/// literal hostname. The resulting names are cross-producted with the
/// configured query types, names outermost.
pub async fn load(tokens: &[String], types: &[RecordType]) -> Result<Vec<Question>, ConfigError> {
	let mut names = Vec::new();
	for token in tokens {
		if let Some(path) = token.strip_prefix('@') {
			let content =
				tokio::fs::read_to_string(path)
					.await
					.map_err(|e| ConfigError::QuestionSource {
						source_name: token.clone(),
						reason: e.to_string(),
					})?;
			names.extend(parse_lines(&content));
		} else if token.starts_with("http://") || token.starts_with("https://") {
			let content = fetch(token).await.map_err(|e| ConfigError::QuestionSource {
				source_name: token.clone(),
				reason: e.to_string(),
			})?;
			names.extend(parse_lines(&content));
		} else {
			names.push(token.clone());
		}
	}

	let mut questions = Vec::with_capacity(names.len() * types.len());
	for name in &names {
		let parsed = to_fqdn(name).ok_or_else(|| ConfigError::QuestionSource {
			source_name: name.clone(),
			reason: "not a valid hostname".to_string(),
		})?;
		for qtype in types {
			questions.push(Question::new(parsed.clone(), *qtype));
		}
	}

	if questions.is_empty() {
		return Err(ConfigError::EmptyQuestionList);
	}
	Ok(questions)
}

/// Parse the query type names given on the command line.
pub fn parse_types(types: &[String]) -> Result<Vec<RecordType>, ConfigError> {
	let mut parsed = Vec::with_capacity(types.len());
	for t in types {
		let rt: RecordType = t
			.to_ascii_uppercase()
			.parse()
			.map_err(|_| ConfigError::InvalidQueryType(t.clone()))?;
		parsed.push(rt);
	}
	Ok(parsed)
}

async fn fetch(url: &str) -> anyhow::Result<String> {
	let response = reqwest::get(url).await?.error_for_status()?;
	Ok(response.text().await?)
}

fn parse_lines(content: &str) -> Vec<String> {
	content
		.lines()
		.map(|line| line.trim())
		.filter(|line| !line.is_empty() && !line.starts_with('#'))
		.map(String::from)
		.collect()
}

fn to_fqdn(name: &str) -> Option<Name> {
	let mut parsed = Name::from_ascii(name).ok()?;
	parsed.set_fqdn(true);
	Some(parsed)
}
