use std::time::Duration;

use reqwest::Client;

#[derive(Debug, thiserror::Error)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct WebScraper {
    client: Client,
    base_url: String,
}

impl WebScraper {
    pub fn new() -> Result<Self, ScraperError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            client,
            base_url: crate::BASE_URL.to_string(),
        })
    }

    pub fn makes_url(&self) -> String {
        format!("{}/coches", self.base_url)
    }

    pub fn make_children_url(&self, href: &str) -> String {
        format!(
            "{}{}?market[]=available&market[]=discontinued",
            self.base_url, href
        )
    }

    pub fn model_children_url(&self, href: &str) -> String {
        format!("{}{}/datos", self.base_url, href)
    }

    pub fn trim_url(&self, href: &str) -> String {
        format!("{}{}", self.base_url, href)
    }

    pub async fn get_html(&self, url: &str) -> Result<String, ScraperError> {
        log::debug!("Getting the source for {}", url);
        Ok(self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?)
    }

    /// Fetches a page, recovering redirect exhaustion as empty markup.
    ///
    /// Some discontinued listings redirect in a loop; their markup is treated
    /// as missing so the caller can continue with the next entity.
    pub async fn get_html_or_empty(&self, url: &str) -> Result<String, ScraperError> {
        match self.get_html(url).await {
            Ok(html) => Ok(html),
            Err(ScraperError::RequestError(e)) if e.is_redirect() => {
                log::error!("Too many redirects for {}", url);
                Ok(String::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Fetches a trim's markup: the data page concatenated with its
    /// equipment page, which carries the option tables.
    pub async fn fetch_trim_source(&self, url: &str) -> Result<String, ScraperError> {
        let mut html = self.get_html_or_empty(url).await?;
        let equipment = self
            .get_html_or_empty(&format!("{}/equipamiento", url))
            .await?;
        html.push_str(&equipment);
        Ok(html)
    }
}
