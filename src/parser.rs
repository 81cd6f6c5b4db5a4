use indexmap::IndexMap;
use scraper::{ElementRef, Html, Selector};

use crate::types::{MakeLink, ModelLink, Record, SpecOps, TrimLink, Value};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Label whose value is carried by an image's alt text instead of cell text.
const ENV_BADGE_LABEL: &str = "Distintivo ambiental";

fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns the second line of a multi-line cell text, trimmed.
///
/// Cells on km77 pages often carry a leading icon/label line; the payload is
/// on the line after it. Single-line text is used as-is.
fn second_line(text: &str) -> String {
    match text.split_once('\n') {
        Some((_, rest)) => rest.lines().next().unwrap_or("").trim().to_string(),
        None => text.to_string(),
    }
}

fn first_line(text: &str) -> &str {
    text.split('\n').next().unwrap_or("")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Specs,
    Options,
}

struct RowSelectors {
    table: Selector,
    caption: Selector,
    row: Selector,
    td: Selector,
    th: Selector,
    value_cell: Selector,
    img: Selector,
    addon_item: Selector,
}

impl RowSelectors {
    fn new() -> Self {
        Self {
            table: Selector::parse("table.table").unwrap(),
            caption: Selector::parse("caption.caption-top").unwrap(),
            row: Selector::parse("tr").unwrap(),
            td: Selector::parse("td").unwrap(),
            th: Selector::parse("th").unwrap(),
            value_cell: Selector::parse("td.text-right").unwrap(),
            img: Selector::parse("img").unwrap(),
            addon_item: Selector::parse("div.modal-body li").unwrap(),
        }
    }
}

/// The five row shapes a data-table row can take, in precedence order.
#[derive(Debug)]
enum RowShape {
    Package {
        name: String,
        price: String,
        addons: Vec<String>,
    },
    SectionHeader {
        label: String,
    },
    Continuation {
        key: String,
        value: String,
    },
    KeyValue {
        key: String,
        value: String,
    },
    Unrecognized,
}

/// Classifies one row from its extracted cell lists.
///
/// The package check runs first: its three-value-cell signature is the most
/// specific, and a row matching it must not fall through to the key/value
/// shape. Rows matching none of the shapes are reported as unrecognized and
/// their data is dropped rather than guessed at.
fn classify_row(row: ElementRef, sels: &RowSelectors) -> RowShape {
    let tds: Vec<ElementRef> = row.select(&sels.td).collect();
    let ths: Vec<ElementRef> = row.select(&sels.th).collect();

    if tds.len() == 3 {
        let name = first_line(elem_text(tds[0]).trim()).to_string();
        let price = elem_text(tds[1]).trim().to_string();
        let addons = tds[0].select(&sels.addon_item).map(elem_text).collect();
        return RowShape::Package {
            name,
            price,
            addons,
        };
    }

    if tds.is_empty() {
        return match ths.first() {
            Some(th) => RowShape::SectionHeader {
                label: second_line(&elem_text(*th)),
            },
            None => RowShape::Unrecognized,
        };
    }

    if ths.is_empty() {
        if tds.len() != 2 {
            return RowShape::Unrecognized;
        }
        return RowShape::Continuation {
            key: second_line(&elem_text(tds[0])),
            value: second_line(&elem_text(tds[1])),
        };
    }

    let key = second_line(&elem_text(ths[0]));
    let value = if key.contains(ENV_BADGE_LABEL) {
        match tds[0]
            .select(&sels.img)
            .next()
            .and_then(|img| img.value().attr("alt"))
        {
            Some(alt) => alt.to_string(),
            None => return RowShape::Unrecognized,
        }
    } else {
        match row.select(&sels.value_cell).next() {
            Some(cell) => second_line(&elem_text(cell)),
            None => return RowShape::Unrecognized,
        }
    };
    RowShape::KeyValue { key, value }
}

/// Reduces a table's rows into one data mapping.
///
/// The only carried state is the most recent section header's label, which
/// continuation rows bind their sub-entries to.
fn reduce_rows(table: ElementRef, sels: &RowSelectors) -> IndexMap<String, Value> {
    let mut data = IndexMap::new();
    let mut last_section_key: Option<String> = None;

    for row in table.select(&sels.row) {
        match classify_row(row, sels) {
            RowShape::Package {
                name,
                price,
                addons,
            } => {
                data.insert(name, Value::Package { price, addons });
            }
            RowShape::SectionHeader { label } => {
                data.insert(label.clone(), Value::Section(IndexMap::new()));
                last_section_key = Some(label);
            }
            RowShape::Continuation { key, value } => {
                match last_section_key.as_ref().and_then(|k| data.get_mut(k)) {
                    Some(Value::Section(entries)) => {
                        entries.insert(key, value);
                    }
                    _ => log::debug!("Dropping continuation row '{}' with no open section", key),
                }
            }
            RowShape::KeyValue { key, value } => {
                data.insert(key, Value::Text(value));
            }
            RowShape::Unrecognized => {
                log::debug!(
                    "Dropping unrecognized row: {}",
                    normalize_whitespace(&elem_text(row))
                );
            }
        }
    }

    data
}

fn resolve_caption(caption: ElementRef, region: Region) -> String {
    let text = elem_text(caption);
    match region {
        Region::Specs => text.trim().to_string(),
        // The options caption has a two-line form; only the second line is
        // the table's name.
        Region::Options => second_line(&text),
    }
}

fn parse_region(div: ElementRef, region: Region, sels: &RowSelectors) -> Vec<Record> {
    let mut records = Vec::new();

    for table in div.select(&sels.table) {
        if table.select(&sels.row).next().is_none() {
            continue;
        }
        let Some(caption) = table.select(&sels.caption).next() else {
            log::debug!("Skipping table without caption");
            continue;
        };

        records.push(Record {
            caption: resolve_caption(caption, region),
            data: reduce_rows(table, sels),
        });
    }

    records
}

/// Extracts the spec and option records from a trim page.
///
/// Pure function of its input: locates the two content regions, enumerates
/// their data tables in document order and reduces each table's rows into one
/// [`Record`]. A missing region yields an empty list for that side; when
/// neither region is present the miss is logged and both lists are empty.
pub fn parse_specops(html: &str) -> SpecOps {
    let document = Html::parse_document(html);
    let specs_sel = Selector::parse("div#measurements-1").unwrap();
    let options_sel = Selector::parse("div#features-2").unwrap();
    let sels = RowSelectors::new();

    let specs_region = document.select(&specs_sel).next();
    let options_region = document.select(&options_sel).next();

    if specs_region.is_none() && options_region.is_none() {
        log::warn!("No spec or option region found in document");
    }

    SpecOps {
        specs: specs_region
            .map(|div| parse_region(div, Region::Specs, &sels))
            .unwrap_or_default(),
        options: options_region
            .map(|div| parse_region(div, Region::Options, &sels))
            .unwrap_or_default(),
    }
}

/// Extracts the car brands from the makes page.
pub fn parse_make_list(html: &str) -> Vec<MakeLink> {
    let document = Html::parse_document(html);
    let item_sel = Selector::parse("div.js-brand-item").unwrap();
    let a_sel = Selector::parse("a").unwrap();

    let mut makes = Vec::new();
    for item in document.select(&item_sel) {
        let Some(a) = item.select(&a_sel).next() else {
            log::warn!(
                "Skipping brand block without a link: {}",
                normalize_whitespace(&elem_text(item))
            );
            continue;
        };
        let Some(href) = a.value().attr("href") else {
            log::warn!("Skipping brand link without href");
            continue;
        };
        makes.push(MakeLink {
            name: elem_text(a).trim().to_string(),
            url: href.to_string(),
        });
    }
    makes
}

/// Extracts the models from a make's vehicle listing page.
pub fn parse_model_list(html: &str) -> Vec<ModelLink> {
    let document = Html::parse_document(html);
    let item_sel = Selector::parse("li.vehicle-block").unwrap();

    let mut models = Vec::new();
    for item in document.select(&item_sel) {
        match parse_model_entry(item) {
            Ok(model) => models.push(model),
            Err(e) => log::warn!(
                "Skipping model entry '{}': {}",
                normalize_whitespace(&elem_text(item)),
                e
            ),
        }
    }
    models
}

fn parse_model_entry(item: ElementRef) -> Result<ModelLink, ParseError> {
    let name_sel = Selector::parse("div.veh-name").unwrap();
    let a_sel = Selector::parse("a").unwrap();

    let name_div = item
        .select(&name_sel)
        .next()
        .ok_or_else(|| ParseError::MissingField("model name".to_string()))?;
    // The name block reads "Name | production years"; everything after the
    // pipe belongs to the year span.
    let name = elem_text(name_div)
        .split('|')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    let href = item
        .select(&a_sel)
        .next()
        .and_then(|a| a.value().attr("href"))
        .ok_or_else(|| ParseError::MissingField("model href".to_string()))?;

    Ok(ModelLink {
        name,
        url: href.to_string(),
    })
}

/// Extracts the trims from a model's data page.
pub fn parse_trim_list(html: &str) -> Vec<TrimLink> {
    let document = Html::parse_document(html);
    let item_sel = Selector::parse("td.vehicle-name").unwrap();

    let mut trims = Vec::new();
    for item in document.select(&item_sel) {
        match parse_trim_entry(item) {
            Ok(trim) => trims.push(trim),
            Err(e) => log::warn!(
                "Skipping trim entry '{}': {}",
                normalize_whitespace(&elem_text(item)),
                e
            ),
        }
    }
    trims
}

fn parse_trim_entry(item: ElementRef) -> Result<TrimLink, ParseError> {
    let a_sel = Selector::parse("a").unwrap();
    let span_sel = Selector::parse("span").unwrap();

    let a = item
        .select(&a_sel)
        .next()
        .ok_or_else(|| ParseError::MissingField("trim link".to_string()))?;
    let name = second_line(&elem_text(a));
    let href = a
        .value()
        .attr("href")
        .ok_or_else(|| ParseError::MissingField("trim href".to_string()))?;

    // The production span wraps its closing parenthesis onto the next line.
    let span = item
        .select(&span_sel)
        .next()
        .ok_or_else(|| ParseError::MissingField("trim production".to_string()))?;
    let production = format!("{})", first_line(&elem_text(span)).trim());

    Ok(TrimLink {
        name,
        production,
        url: href.to_string(),
    })
}
