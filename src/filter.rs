use std::sync::LazyLock;

use regex::Regex;

use crate::types::{Make, Trim, Value};

static RE_LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\d.,]+)").expect("invalid regex: leading number"));
static RE_PRODUCTION_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d{4})").expect("invalid regex: production start"));

/// Parses the leading number of a field like "170 CV / 125 kW" or "9,2 s".
///
/// Spanish number formatting: dots separate thousands, the comma is the
/// decimal mark. Placeholder values ("No disponible") parse as none.
fn leading_number(text: &str) -> Option<f64> {
    let caps = RE_LEADING_NUMBER.captures(text.trim())?;
    caps[1].replace('.', "").replace(',', ".").parse().ok()
}

fn text_field<'a>(trim: &'a Trim, key: &str) -> Option<&'a str> {
    trim.field(key).and_then(Value::as_text)
}

/// Combined consumption in l/100km, preferring the NEDC figure and falling
/// back to WLTP for trims measured under the newer cycle only.
fn consumption(trim: &Trim) -> Option<f64> {
    let nedc = trim
        .field("Consumo NEDC")
        .and_then(Value::as_section)
        .and_then(|section| section.get("Medio"));
    let wltp = trim
        .field("Consumo WLTP")
        .and_then(Value::as_section)
        .and_then(|section| section.get("Combinado"));
    nedc.or(wltp).and_then(|text| leading_number(text))
}

/// Chainable predicate query over every trim in a crawled hierarchy.
///
/// Each refinement narrows the candidate list; trims missing the probed
/// field never match.
pub struct TrimQuery<'a> {
    trims: Vec<&'a Trim>,
}

impl<'a> TrimQuery<'a> {
    pub fn new(makes: &'a [Make]) -> Self {
        Self {
            trims: makes
                .iter()
                .flat_map(|make| &make.models)
                .flat_map(|model| &model.trims)
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.trims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trims.is_empty()
    }

    pub fn results(self) -> Vec<&'a Trim> {
        self.trims
    }

    /// Keeps trims whose field equals the given value exactly.
    pub fn with_field(mut self, key: &str, value: &str) -> Self {
        self.trims
            .retain(|trim| text_field(trim, key) == Some(value));
        self
    }

    pub fn min_power_cv(mut self, cv: f64) -> Self {
        self.trims.retain(|trim| {
            text_field(trim, "Potencia máxima")
                .and_then(leading_number)
                .is_some_and(|power| power >= cv)
        });
        self
    }

    pub fn max_accel_s(mut self, seconds: f64) -> Self {
        self.trims.retain(|trim| {
            text_field(trim, "Aceleración 0-100 km/h")
                .and_then(leading_number)
                .is_some_and(|accel| accel <= seconds)
        });
        self
    }

    pub fn disc_brakes(mut self) -> Self {
        self.trims.retain(|trim| {
            let front = text_field(trim, "Tipo de frenos delanteros");
            let rear = text_field(trim, "Tipo de frenos traseros");
            matches!((front, rear), (Some(front), Some(rear))
                if front.to_lowercase().contains("disco") && rear.to_lowercase().contains("disco"))
        });
        self
    }

    pub fn max_consumption_l(mut self, litres: f64) -> Self {
        self.trims
            .retain(|trim| consumption(trim).is_some_and(|value| value <= litres));
        self
    }

    pub fn min_height_mm(mut self, mm: f64) -> Self {
        self.trims.retain(|trim| {
            text_field(trim, "Altura")
                .and_then(leading_number)
                .is_some_and(|height| height >= mm)
        });
        self
    }

    /// Keeps trims with any field name containing the text, case-insensitive.
    /// Equipment like adaptive cruise or keyless entry is encoded in the key
    /// rather than the value.
    pub fn key_contains(mut self, needle: &str) -> Self {
        let needle = needle.to_lowercase();
        self.trims.retain(|trim| {
            trim.specs
                .iter()
                .chain(&trim.options)
                .any(|record| record.data.keys().any(|key| key.to_lowercase().contains(&needle)))
        });
        self
    }

    pub fn produced_since(mut self, year: i32) -> Self {
        self.trims.retain(|trim| {
            RE_PRODUCTION_START
                .captures(&trim.production)
                .and_then(|caps| caps[1].parse::<i32>().ok())
                .is_some_and(|start| start >= year)
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Model, Record};
    use indexmap::IndexMap;

    fn trim(name: &str, production: &str, data: Vec<(&str, Value)>) -> Trim {
        Trim {
            id: 0,
            model_id: 0,
            name: name.to_string(),
            production: production.to_string(),
            children_url: String::new(),
            raw_markup: None,
            specs: vec![Record {
                caption: "Motor".to_string(),
                data: data
                    .into_iter()
                    .map(|(key, value)| (key.to_string(), value))
                    .collect(),
            }],
            options: Vec::new(),
        }
    }

    fn hierarchy(trims: Vec<Trim>) -> Vec<Make> {
        vec![Make {
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
                trims,
            }],
        }]
    }

    fn text(value: &str) -> Value {
        Value::Text(value.to_string())
    }

    #[test]
    fn test_leading_number_formats() {
        assert_eq!(leading_number("170 CV / 125 kW"), Some(170.0));
        assert_eq!(leading_number("9,2 s"), Some(9.2));
        assert_eq!(leading_number("1.598 cm³"), Some(1598.0));
        assert_eq!(leading_number("No disponible"), None);
    }

    #[test]
    fn test_field_and_power_filters_chain() {
        let makes = hierarchy(vec![
            trim(
                "1.5 TSI",
                "(2021)",
                vec![
                    ("Combustible", text("Gasolina")),
                    ("Potencia máxima", text("150 CV / 110 kW")),
                ],
            ),
            trim(
                "1.0 MPI",
                "(2019)",
                vec![
                    ("Combustible", text("Gasolina")),
                    ("Potencia máxima", text("80 CV / 59 kW")),
                ],
            ),
            trim(
                "1.6 TDI",
                "(2019)",
                vec![
                    ("Combustible", text("Gasóleo")),
                    ("Potencia máxima", text("No disponible")),
                ],
            ),
        ]);

        let results = TrimQuery::new(&makes)
            .with_field("Combustible", "Gasolina")
            .min_power_cv(100.0)
            .results();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "1.5 TSI");
    }

    #[test]
    fn test_consumption_prefers_nedc_and_falls_back_to_wltp() {
        let nedc = trim(
            "NEDC trim",
            "(2018)",
            vec![(
                "Consumo NEDC",
                Value::Section(IndexMap::from([(
                    "Medio".to_string(),
                    "4,8 l/100km".to_string(),
                )])),
            )],
        );
        let wltp = trim(
            "WLTP trim",
            "(2022)",
            vec![(
                "Consumo WLTP",
                Value::Section(IndexMap::from([(
                    "Combinado".to_string(),
                    "6,1 l/100km".to_string(),
                )])),
            )],
        );
        let makes = hierarchy(vec![nedc, wltp]);

        let results = TrimQuery::new(&makes).max_consumption_l(5.0).results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "NEDC trim");
    }

    #[test]
    fn test_key_contains_matches_equipment_keys() {
        let makes = hierarchy(vec![
            trim(
                "Con ACC",
                "(2021)",
                vec![("Control de crucero adaptativo", text("Sí"))],
            ),
            trim("Sin ACC", "(2021)", vec![("Velocímetro", text("Sí"))]),
        ]);

        let results = TrimQuery::new(&makes).key_contains("crucero adapt").results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Con ACC");
    }

    #[test]
    fn test_produced_since_reads_production_start() {
        let makes = hierarchy(vec![
            trim("Nuevo", "(2022 - 2024)", Vec::new()),
            trim("Viejo", "(2008 - 2017)", Vec::new()),
            trim("Sin fecha", "", Vec::new()),
        ]);

        let results = TrimQuery::new(&makes).produced_since(2020).results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Nuevo");
    }

    #[test]
    fn test_disc_brakes_requires_both_axles() {
        let makes = hierarchy(vec![
            trim(
                "Discos",
                "(2021)",
                vec![
                    ("Tipo de frenos delanteros", text("Disco ventilado")),
                    ("Tipo de frenos traseros", text("Disco macizo")),
                ],
            ),
            trim(
                "Tambor",
                "(2019)",
                vec![
                    ("Tipo de frenos delanteros", text("Disco ventilado")),
                    ("Tipo de frenos traseros", text("Tambor")),
                ],
            ),
        ]);

        let results = TrimQuery::new(&makes).disc_brakes().results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Discos");
    }
}
