use std::path::Path;

/// Read a newline-separated list of addresses.
///
/// Lines are trimmed and blank lines are skipped; no further validation happens here,
/// malformed addresses surface later when the check parses them.
pub async fn read_address_file(path: &Path) -> std::io::Result<Vec<String>> {
	let content = tokio::fs::read_to_string(path).await?;
	Ok(parse_address_list(&content))
}

fn parse_address_list(content: &str) -> Vec<String> {
	content
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.map(str::to_string)
		.collect()
}
