//! EDGAR endpoint URLs.
//!
//! Builders only; nothing here fetches or parses. Pass the results to
//! [`SecClient::fetch`](crate::SecClient::fetch).

use url::form_urlencoded;

/// Host serving archives, ticker files and the classic browse interface.
pub const WWW_BASE_URL: &str = "https://www.sec.gov";

/// Host serving the JSON REST API.
pub const DATA_BASE_URL: &str = "https://data.sec.gov";

/// Zero-pad a CIK to the ten digits the REST API expects.
///
/// # Examples
/// ```
/// assert_eq!(secq::edgar::pad_cik("320193"), "0000320193");
/// ```
pub fn pad_cik(cik: &str) -> String {
    format!("{:0>10}", cik.trim())
}

/// Strip leading zeros from a CIK, as used in archive paths.
pub fn strip_cik(cik: &str) -> &str {
    let stripped = cik.trim().trim_start_matches('0');
    if stripped.is_empty() { "0" } else { stripped }
}

/// Accession number without dashes, as used in archive paths.
pub fn accession_path(accession: &str) -> String {
    accession.trim().replace('-', "")
}

/// Ticker to CIK mapping for all filers.
pub fn company_tickers_url() -> String {
    format!("{WWW_BASE_URL}/files/company_tickers.json")
}

/// Filing history of one filer.
pub fn submissions_url(cik: &str) -> String {
    format!("{DATA_BASE_URL}/submissions/CIK{}.json", pad_cik(cik))
}

/// All XBRL facts reported by one filer.
pub fn company_facts_url(cik: &str) -> String {
    format!(
        "{DATA_BASE_URL}/api/xbrl/companyfacts/CIK{}.json",
        pad_cik(cik)
    )
}

/// Index page listing the documents of one filing.
pub fn filing_index_url(cik: &str, accession: &str) -> String {
    format!(
        "{WWW_BASE_URL}/Archives/edgar/data/{}/{}/index.html",
        strip_cik(cik),
        accession_path(accession)
    )
}

/// 13F information table of one filing.
pub fn info_table_url(cik: &str, accession: &str) -> String {
    format!(
        "{WWW_BASE_URL}/Archives/edgar/data/{}/{}/infotable.xml",
        strip_cik(cik),
        accession_path(accession)
    )
}

/// Filing list for a ticker in the classic browse interface.
pub fn company_search_url(ticker: &str, form_type: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("action", "getcompany")
        .append_pair("ticker", ticker.trim())
        .append_pair("type", form_type.trim())
        .append_pair("owner", "exclude")
        .append_pair("count", "100")
        .finish();
    format!("{WWW_BASE_URL}/cgi-bin/browse-edgar?{query}")
}

/// Absolute URL for a path on the archive host, such as an `href` taken from
/// a filing index.
pub fn archive_url(path: &str) -> String {
    if path.starts_with("https://") || path.starts_with("http://") {
        return path.to_string();
    }
    let path = path.trim_start_matches('/');
    format!("{WWW_BASE_URL}/{path}")
}
