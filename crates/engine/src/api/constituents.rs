//! Index constituent lists (Nifty 50 from NSE archives, S&P 500 from the
//! public datasets mirror)

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::random_user_agent;
use crate::error::ProviderError;
use crate::tickers::TickerSource;
use crate::types::Market;

pub const NIFTY50_URL: &str = "https://nsearchives.nseindia.com/content/indices/ind_nifty50list.csv";
pub const SP500_URL: &str =
    "https://raw.githubusercontent.com/datasets/s-and-p-500-companies/main/data/constituents.csv";

#[derive(Clone)]
pub struct ConstituentsClient {
    client: Client,
    nifty50_url: String,
    sp500_url: String,
}

impl ConstituentsClient {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_urls(NIFTY50_URL, SP500_URL, timeout)
    }

    pub fn with_urls(
        nifty50_url: &str,
        sp500_url: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            nifty50_url: nifty50_url.to_string(),
            sp500_url: sp500_url.to_string(),
        })
    }

    fn url_for(&self, market: Market) -> &str {
        match market {
            Market::India => &self.nifty50_url,
            Market::Us => &self.sp500_url,
        }
    }
}

/// Values of the `Symbol` column of a constituents CSV
pub fn parse_symbol_column(body: &str) -> Result<Vec<String>, ProviderError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| ProviderError::Malformed(format!("constituents header: {e}")))?;
    let Some(idx) = headers.iter().position(|h| h.eq_ignore_ascii_case("symbol")) else {
        return Err(ProviderError::Malformed(
            "constituents CSV has no Symbol column".to_string(),
        ));
    };

    let mut symbols = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| ProviderError::Malformed(format!("constituents row: {e}")))?;
        if let Some(symbol) = record.get(idx).filter(|s| !s.is_empty()) {
            symbols.push(symbol.to_string());
        }
    }
    Ok(symbols)
}

#[async_trait]
impl TickerSource for ConstituentsClient {
    async fn fetch_tickers(&self, market: Market) -> Result<Vec<String>, ProviderError> {
        let url = self.url_for(market);
        debug!(%market, url, "Fetching index constituents");

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, random_user_agent())
            .header(ACCEPT, "text/csv,*/*")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), url, body));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(ProviderError::Empty(market.index_name().to_string()));
        }
        parse_symbol_column(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const NIFTY_CSV: &str = "Company Name,Industry,Symbol,Series,ISIN Code\n\
        Reliance Industries Ltd.,Oil Gas & Consumable Fuels,RELIANCE,EQ,INE002A01018\n\
        Tata Consultancy Services Ltd.,Information Technology,TCS,EQ,INE467B01029\n";

    #[test]
    fn test_parse_symbol_column() {
        let symbols = parse_symbol_column(NIFTY_CSV).unwrap();
        assert_eq!(symbols, vec!["RELIANCE", "TCS"]);
    }

    #[test]
    fn test_missing_symbol_column() {
        assert!(matches!(
            parse_symbol_column("Name,Sector\nApple,Tech\n"),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_per_market() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nifty50.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string(NIFTY_CSV))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sp500.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "Symbol,Security,GICS Sector\nAAPL,Apple Inc.,Information Technology\nBRK.B,Berkshire Hathaway,Financials\n",
            ))
            .mount(&server)
            .await;

        let client = ConstituentsClient::with_urls(
            &format!("{}/nifty50.csv", server.uri()),
            &format!("{}/sp500.csv", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            client.fetch_tickers(Market::India).await.unwrap(),
            vec!["RELIANCE", "TCS"]
        );
        assert_eq!(
            client.fetch_tickers(Market::Us).await.unwrap(),
            vec!["AAPL", "BRK.B"]
        );
    }

    #[tokio::test]
    async fn test_status_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nifty50.csv"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sp500.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  \n"))
            .mount(&server)
            .await;

        let client = ConstituentsClient::with_urls(
            &format!("{}/nifty50.csv", server.uri()),
            &format!("{}/sp500.csv", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = client.fetch_tickers(Market::India).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited));
        let err = client.fetch_tickers(Market::Us).await.unwrap_err();
        assert!(matches!(err, ProviderError::Empty(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_forbidden_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = ConstituentsClient::with_urls(
            &format!("{}/nifty50.csv", server.uri()),
            &format!("{}/sp500.csv", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();
        let err = client.fetch_tickers(Market::India).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { status: 403, .. }));
        assert!(!err.is_retryable());
    }
}
