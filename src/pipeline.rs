use std::collections::HashMap;
use std::fmt;

use futures::stream::{FuturesUnordered, StreamExt};

use crate::parser;
use crate::scraper::{ScraperError, WebScraper};
use crate::store::{NodeKind, RecordKind, Store, StoreError};
use crate::types::{Make, Model, Trim};

#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("Scraper error: {0}")]
    Scraper(#[from] ScraperError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Summary counts logged after each pipeline stage.
#[derive(Debug, PartialEq, Eq)]
pub struct CrawlStats {
    pub makes: usize,
    pub models: usize,
    pub trims: usize,
    pub records: usize,
}

impl CrawlStats {
    pub fn from_makes(makes: &[Make]) -> Self {
        Self {
            makes: makes.len(),
            models: makes.iter().map(|make| make.models.len()).sum(),
            trims: makes
                .iter()
                .flat_map(|make| &make.models)
                .map(|model| model.trims.len())
                .sum(),
            records: makes
                .iter()
                .flat_map(|make| &make.models)
                .flat_map(|model| &model.trims)
                .map(|trim| trim.specs.len() + trim.options.len())
                .sum(),
        }
    }
}

impl fmt::Display for CrawlStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Database has:")?;
        if self.makes > 0 {
            write!(f, "\n\t{} makes", self.makes)?;
        }
        if self.models > 0 {
            write!(f, "\n\t{} models", self.models)?;
        }
        if self.trims > 0 {
            write!(f, "\n\t{} trims", self.trims)?;
        }
        if self.records > 0 {
            write!(f, "\n\t{} records", self.records)?;
        }
        Ok(())
    }
}

/// Drives the full crawl: makes, then models, then trims, then each trim's
/// spec and option records.
///
/// Every stage is idempotent: raw markup is fetched at most once, children
/// are de-duplicated by name and trims with populated records are skipped,
/// so an interrupted run picks up where it left off.
pub struct Crawler {
    scraper: WebScraper,
    store: Store,
    flatten: bool,
}

impl Crawler {
    pub fn new(scraper: WebScraper, store: Store, flatten: bool) -> Self {
        Self {
            scraper,
            store,
            flatten,
        }
    }

    pub async fn run(&self) -> Result<(), CrawlError> {
        let mut makes = self.store.load_makes()?;
        log::info!("Loaded {} makes from the database.", makes.len());

        if makes.is_empty() {
            makes = self.discover_makes().await?;
        }
        log::info!("{}", CrawlStats::from_makes(&makes));

        if makes.iter().any(|make| make.models.is_empty()) {
            log::info!("Getting the models for each make...");
            self.populate_models(&mut makes).await?;
            log::info!("{}", CrawlStats::from_makes(&makes));
        }

        if makes
            .iter()
            .flat_map(|make| &make.models)
            .any(|model| model.trims.is_empty())
        {
            log::info!("Getting the trims for each model...");
            self.populate_trims(&mut makes).await?;
            log::info!("{}", CrawlStats::from_makes(&makes));
        }

        if makes
            .iter()
            .flat_map(|make| &make.models)
            .flat_map(|model| &model.trims)
            .any(|trim| trim.specs.is_empty())
        {
            log::info!("Getting the specs and options for each trim...");
            self.populate_specops(&mut makes).await?;
        }
        log::info!("{}", CrawlStats::from_makes(&makes));
        log::info!("Done.");
        Ok(())
    }

    async fn discover_makes(&self) -> Result<Vec<Make>, CrawlError> {
        let url = self.scraper.makes_url();
        log::info!("Fetching the makes page {}...", url);
        let html = self.scraper.get_html_or_empty(&url).await?;

        let links = parser::parse_make_list(&html);
        log::info!("Found {} makes.", links.len());

        let mut makes: Vec<Make> = Vec::new();
        for link in links {
            if makes.iter().any(|make| make.name == link.name) {
                continue;
            }
            let make = Make {
                id: self.store.next_id(NodeKind::Make)?,
                name: link.name,
                children_url: self.scraper.make_children_url(&link.url),
                raw_markup: None,
                models: Vec::new(),
            };
            self.store.insert_make(&make)?;
            makes.push(make);
        }
        Ok(makes)
    }

    /// Fetches the raw markup for every pending entity concurrently, writing
    /// each result through to the store as it arrives. A failed fetch is
    /// logged and that entity is skipped; a later run retries it.
    async fn fetch_sources(
        &self,
        kind: NodeKind,
        pending: Vec<(i64, String)>,
    ) -> Result<HashMap<i64, String>, CrawlError> {
        let scraper = &self.scraper;
        let mut futs: FuturesUnordered<_> = pending
            .into_iter()
            .map(|(id, url)| async move {
                let result = if kind == NodeKind::Trim {
                    scraper.fetch_trim_source(&url).await
                } else {
                    scraper.get_html_or_empty(&url).await
                };
                (id, url, result)
            })
            .collect();

        let mut sources = HashMap::new();
        while let Some((id, url, result)) = futs.next().await {
            match result {
                Ok(html) => {
                    self.store.write_raw(kind, id, &html)?;
                    sources.insert(id, html);
                }
                Err(e) => log::error!("Error getting source for {}: {}", url, e),
            }
        }
        Ok(sources)
    }

    async fn populate_models(&self, makes: &mut [Make]) -> Result<(), CrawlError> {
        let pending: Vec<(i64, String)> = makes
            .iter()
            .filter(|make| make.raw_markup.is_none())
            .map(|make| (make.id, make.children_url.clone()))
            .collect();
        let fetched = self.fetch_sources(NodeKind::Make, pending).await?;

        for make in makes.iter_mut() {
            if let Some(html) = fetched.get(&make.id) {
                make.raw_markup = Some(html.clone());
            }
            if let Err(e) = self.discover_models(make) {
                log::error!("Error getting models for {}: {}", make.name, e);
            }
        }
        Ok(())
    }

    fn discover_models(&self, make: &mut Make) -> Result<(), StoreError> {
        if !make.children_url.contains("coches") {
            log::debug!("Skipping {} as it has no model listing", make.name);
            return Ok(());
        }
        let Some(html) = make.raw_markup.as_deref() else {
            log::error!("No source found for {}", make.name);
            return Ok(());
        };
        for link in parser::parse_model_list(html) {
            if make.models.iter().any(|model| model.name == link.name) {
                continue;
            }
            let model = Model {
                id: self.store.next_id(NodeKind::Model)?,
                make_id: make.id,
                name: link.name,
                children_url: self.scraper.model_children_url(&link.url),
                raw_markup: None,
                trims: Vec::new(),
            };
            self.store.insert_model(&model)?;
            make.models.push(model);
        }
        Ok(())
    }

    async fn populate_trims(&self, makes: &mut [Make]) -> Result<(), CrawlError> {
        let pending: Vec<(i64, String)> = makes
            .iter()
            .flat_map(|make| &make.models)
            .filter(|model| model.raw_markup.is_none())
            .map(|model| (model.id, model.children_url.clone()))
            .collect();
        let fetched = self.fetch_sources(NodeKind::Model, pending).await?;

        for model in makes.iter_mut().flat_map(|make| make.models.iter_mut()) {
            if let Some(html) = fetched.get(&model.id) {
                model.raw_markup = Some(html.clone());
            }
            if let Err(e) = self.discover_trims(model) {
                log::error!("Error getting trims for {}: {}", model.name, e);
            }
        }
        Ok(())
    }

    fn discover_trims(&self, model: &mut Model) -> Result<(), StoreError> {
        if model.children_url.contains("informacion") {
            log::debug!("Skipping {} as it has no trims", model.name);
            return Ok(());
        }
        let Some(html) = model.raw_markup.as_deref() else {
            log::error!("No source found for {}", model.name);
            return Ok(());
        };
        let links = parser::parse_trim_list(html);
        if links.is_empty() {
            log::error!("No trims found for {}", model.name);
            return Ok(());
        }
        for link in links {
            if model.trims.iter().any(|trim| trim.name == link.name) {
                continue;
            }
            let trim = Trim {
                id: self.store.next_id(NodeKind::Trim)?,
                model_id: model.id,
                name: link.name,
                production: link.production,
                children_url: self.scraper.trim_url(&link.url),
                raw_markup: None,
                specs: Vec::new(),
                options: Vec::new(),
            };
            self.store.insert_trim(&trim)?;
            model.trims.push(trim);
        }
        Ok(())
    }

    async fn populate_specops(&self, makes: &mut [Make]) -> Result<(), CrawlError> {
        let pending: Vec<(i64, String)> = makes
            .iter()
            .flat_map(|make| &make.models)
            .flat_map(|model| &model.trims)
            .filter(|trim| trim.raw_markup.is_none())
            .map(|trim| (trim.id, trim.children_url.clone()))
            .collect();
        let fetched = self.fetch_sources(NodeKind::Trim, pending).await?;

        for trim in makes
            .iter_mut()
            .flat_map(|make| make.models.iter_mut())
            .flat_map(|model| model.trims.iter_mut())
        {
            if let Some(html) = fetched.get(&trim.id) {
                trim.raw_markup = Some(html.clone());
            }
            if let Err(e) = self.extract_specops(trim) {
                log::error!("Error getting specs and options for {}: {}", trim.name, e);
            }
        }
        Ok(())
    }

    fn extract_specops(&self, trim: &mut Trim) -> Result<(), StoreError> {
        if !trim.specs.is_empty() && !trim.options.is_empty() {
            return Ok(());
        }
        let Some(html) = trim.raw_markup.as_deref() else {
            log::error!("No source found for {}", trim.name);
            return Ok(());
        };
        let specops = parser::parse_specops(html);
        trim.specs = specops.specs;
        trim.options = specops.options;

        self.store
            .write_records(trim.id, RecordKind::Specs, &trim.specs)?;
        self.store
            .write_records(trim.id, RecordKind::Options, &trim.options)?;
        if self.flatten {
            self.store.flatten_fields(trim.id, &trim.specs)?;
            self.store.flatten_fields(trim.id, &trim.options)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Record;

    const MODELS_PAGE: &str = r#"
        <ul>
        <li class="vehicle-block">
            <a href="/coches/seat/ibiza"></a>
            <div class="veh-name">Ibiza <span>| 2017 - 2023</span></div>
        </li>
        <li class="vehicle-block">
            <a href="/coches/seat/ibiza-old"></a>
            <div class="veh-name">Ibiza <span>| 2008 - 2017</span></div>
        </li>
        <li class="vehicle-block">
            <a href="/coches/seat/leon"></a>
            <div class="veh-name">León <span>| 2020</span></div>
        </li>
        </ul>
    "#;

    fn test_crawler() -> Crawler {
        Crawler::new(
            WebScraper::new().unwrap(),
            Store::open_in_memory().unwrap(),
            false,
        )
    }

    #[test]
    fn test_discover_models_deduplicates_by_name() {
        let crawler = test_crawler();
        let mut make = Make {
            id: 1,
            name: "Seat".to_string(),
            children_url: "https://www.km77.com/coches/seat".to_string(),
            raw_markup: Some(MODELS_PAGE.to_string()),
            models: Vec::new(),
        };
        crawler.store.insert_make(&make).unwrap();

        crawler.discover_models(&mut make).unwrap();
        assert_eq!(make.models.len(), 2);
        assert_eq!(make.models[0].name, "Ibiza");
        assert_eq!(make.models[1].name, "León");

        // Re-running discovery must not duplicate children.
        crawler.discover_models(&mut make).unwrap();
        assert_eq!(make.models.len(), 2);
        assert_eq!(crawler.store.load_makes().unwrap()[0].models.len(), 2);
    }

    #[test]
    fn test_discover_models_requires_listing_url() {
        let crawler = test_crawler();
        let mut make = Make {
            id: 1,
            name: "Seat".to_string(),
            children_url: "https://www.km77.com/otros/seat".to_string(),
            raw_markup: Some(MODELS_PAGE.to_string()),
            models: Vec::new(),
        };
        crawler.discover_models(&mut make).unwrap();
        assert!(make.models.is_empty());
    }

    #[test]
    fn test_extract_specops_skips_populated_trim() {
        let crawler = test_crawler();
        let existing = vec![Record {
            caption: "Motor".to_string(),
            data: indexmap::IndexMap::new(),
        }];
        let mut trim = Trim {
            id: 1,
            model_id: 1,
            name: "1.5 TSI".to_string(),
            production: "(2021 - 2023)".to_string(),
            children_url: "https://www.km77.com/coches/seat/ibiza/15-tsi".to_string(),
            raw_markup: Some("<html></html>".to_string()),
            specs: existing.clone(),
            options: existing.clone(),
        };

        crawler.extract_specops(&mut trim).unwrap();
        assert_eq!(trim.specs, existing);
        assert_eq!(trim.options, existing);
    }

    #[test]
    fn test_crawl_stats_counts() {
        let makes = vec![Make {
            id: 1,
            name: "Seat".to_string(),
            children_url: String::new(),
            raw_markup: None,
            models: vec![Model {
                id: 1,
                make_id: 1,
                name: "Ibiza".to_string(),
                children_url: String::new(),
                raw_markup: None,
                trims: vec![Trim {
                    id: 1,
                    model_id: 1,
                    name: "1.5 TSI".to_string(),
                    production: String::new(),
                    children_url: String::new(),
                    raw_markup: None,
                    specs: vec![Record::default()],
                    options: vec![Record::default(), Record::default()],
                }],
            }],
        }];

        let stats = CrawlStats::from_makes(&makes);
        assert_eq!(stats.makes, 1);
        assert_eq!(stats.models, 1);
        assert_eq!(stats.trims, 1);
        assert_eq!(stats.records, 3);
    }
}
