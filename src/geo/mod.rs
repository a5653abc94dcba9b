//! Country and subdivision reference data.
//!
//! The table is built once at startup and shared by reference with the
//! interpreters. Exact lookups go through prebuilt indexes; the fuzzy
//! country fallback memoizes its answers in a small owned cache.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Mutex;
use tracing::debug;

use crate::config::GeoConfig;

const BUILTIN_COUNTRIES: &str = include_str!("../../data/countries.csv");
const BUILTIN_SUBDIVISIONS: &str = include_str!("../../data/subdivisions.csv");

const FUZZY_CACHE_LIMIT: usize = 1024;

/// Colloquial names mapped to the formal name they stand for.
const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("us", "United States of America"),
    ("usa", "United States of America"),
    ("u.s.", "United States of America"),
    ("u.s.a.", "United States of America"),
    ("united states", "United States of America"),
    ("america", "United States of America"),
    ("uk", "United Kingdom of Great Britain and Northern Ireland"),
    ("u.k.", "United Kingdom of Great Britain and Northern Ireland"),
    ("great britain", "United Kingdom of Great Britain and Northern Ireland"),
    ("britain", "United Kingdom of Great Britain and Northern Ireland"),
    ("south korea", "Korea, Republic of"),
    ("north korea", "Korea, Democratic People's Republic of"),
    ("vietnam", "Viet Nam"),
    ("laos", "Lao People's Democratic Republic"),
    ("turkey", "Türkiye"),
    ("holland", "Netherlands"),
    ("czech republic", "Czechia"),
    ("ivory coast", "Côte d'Ivoire"),
    ("swaziland", "Eswatini"),
    ("macedonia", "North Macedonia"),
    ("burma", "Myanmar"),
    ("vatican", "Holy See (Vatican City State)"),
    ("vatican city", "Holy See (Vatican City State)"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct Country {
    pub alpha2: String,
    pub alpha3: String,
    pub name: String,
    #[serde(default)]
    pub official_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subdivision {
    pub code: String,
    pub name: String,
}

impl Subdivision {
    /// Alpha-2 code of the owning country (the part before the hyphen).
    pub fn country(&self) -> &str {
        self.code.split('-').next().unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct GeoTable {
    countries: Vec<Country>,
    country_keys: HashMap<String, usize>,
    subdivisions: Vec<Subdivision>,
    subdivision_codes: HashMap<String, usize>,
    subdivision_names: HashMap<(String, String), usize>,
    fuzzy_cache: Mutex<HashMap<String, Option<usize>>>,
}

impl GeoTable {
    /// Built-in tables, replaced by the CSV files named in the config.
    pub fn load(config: &GeoConfig) -> Result<Self> {
        let countries = match &config.countries_csv {
            Some(path) => read_csv(
                std::fs::File::open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?,
            )?,
            None => read_csv(BUILTIN_COUNTRIES.as_bytes())?,
        };
        let subdivisions = match &config.subdivisions_csv {
            Some(path) => read_csv(
                std::fs::File::open(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?,
            )?,
            None => read_csv(BUILTIN_SUBDIVISIONS.as_bytes())?,
        };
        Ok(Self::from_parts(countries, subdivisions))
    }

    pub fn builtin() -> Result<Self> {
        Self::load(&GeoConfig::default())
    }

    pub fn from_parts(countries: Vec<Country>, subdivisions: Vec<Subdivision>) -> Self {
        let mut country_keys = HashMap::new();
        for (index, country) in countries.iter().enumerate() {
            let mut keys = vec![
                normalize(&country.alpha2),
                normalize(&country.alpha3),
                normalize(&country.name),
            ];
            if let Some(official) = &country.official_name {
                if !official.is_empty() {
                    keys.push(normalize(official));
                }
            }
            for key in keys {
                country_keys.entry(key).or_insert(index);
            }
        }

        let mut subdivision_codes = HashMap::new();
        let mut subdivision_names = HashMap::new();
        for (index, subdivision) in subdivisions.iter().enumerate() {
            subdivision_codes.insert(subdivision.code.to_uppercase(), index);
            // Rows are ordered top level first, so a province never shadows
            // the region of the same name.
            subdivision_names
                .entry((subdivision.country().to_uppercase(), normalize(&subdivision.name)))
                .or_insert(index);
        }

        Self {
            countries,
            country_keys,
            subdivisions,
            subdivision_codes,
            subdivision_names,
            fuzzy_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn country(&self, alpha2: &str) -> Option<&Country> {
        self.country_keys
            .get(&normalize(alpha2))
            .map(|&i| &self.countries[i])
            .filter(|c| c.alpha2.eq_ignore_ascii_case(alpha2))
    }

    pub fn subdivision(&self, code: &str) -> Option<&Subdivision> {
        self.subdivision_codes
            .get(&code.to_uppercase())
            .map(|&i| &self.subdivisions[i])
    }

    /// Resolve a free-form country name to its alpha-2 code.
    pub fn resolve_country(&self, name: &str) -> Option<&str> {
        let key = normalize(name);
        if key.is_empty() {
            return None;
        }

        let key = COUNTRY_ALIASES
            .iter()
            .find(|(alias, _)| *alias == key)
            .map(|(_, formal)| normalize(formal))
            .unwrap_or(key);

        if let Some(&index) = self.country_keys.get(&key) {
            return Some(&self.countries[index].alpha2);
        }

        self.fuzzy_country(&key)
            .map(|index| self.countries[index].alpha2.as_str())
    }

    /// Resolve a subdivision name or code within a country to its
    /// ISO 3166-2 code.
    pub fn resolve_subdivision(&self, country: &str, name: &str) -> Option<&str> {
        let country = country.to_uppercase();
        let trimmed = name.trim();

        if let Some(sub) = self.subdivision(trimmed) {
            if sub.country().eq_ignore_ascii_case(&country) {
                return Some(&sub.code);
            }
        }
        if let Some(sub) = self.subdivision(&format!("{}-{}", country, trimmed)) {
            return Some(&sub.code);
        }

        self.subdivision_names
            .get(&(country, normalize(trimmed)))
            .map(|&i| self.subdivisions[i].code.as_str())
    }

    /// Interpret a metadata state field of the form `CODE-something`
    /// (`US-WA`, `US-WA Washington`), falling back to a name lookup.
    pub fn parse_subdivision_field(&self, country: &str, field: &str) -> Option<String> {
        let token = field.split_whitespace().next()?;
        if let Some((prefix, suffix)) = token.split_once('-') {
            let well_formed = prefix.len() == 2
                && !suffix.is_empty()
                && suffix.len() <= 3
                && suffix.chars().all(|c| c.is_ascii_alphanumeric());
            if well_formed && prefix.eq_ignore_ascii_case(country) {
                let code = token.to_uppercase();
                if self.subdivision(&code).is_none() {
                    debug!(code = %code, "subdivision code not in reference table, keeping it");
                }
                return Some(code);
            }
        }
        self.resolve_subdivision(country, field).map(String::from)
    }

    fn fuzzy_country(&self, key: &str) -> Option<usize> {
        if let Ok(cache) = self.fuzzy_cache.lock() {
            if let Some(hit) = cache.get(key) {
                return *hit;
            }
        }

        let result = self.search_fuzzy(key);

        if let Ok(mut cache) = self.fuzzy_cache.lock() {
            if cache.len() >= FUZZY_CACHE_LIMIT {
                cache.clear();
            }
            cache.insert(key.to_string(), result);
        }
        result
    }

    fn search_fuzzy(&self, key: &str) -> Option<usize> {
        // Single letters and pairs are codes, not names; exact lookup covered them.
        if key.chars().count() < 3 {
            return None;
        }

        let mut candidates: Vec<usize> = self
            .countries
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                let name = normalize(&c.name);
                let official = c.official_name.as_deref().map(normalize).unwrap_or_default();
                name.contains(key) || (!official.is_empty() && official.contains(key))
            })
            .map(|(i, _)| i)
            .collect();

        if candidates.len() > 1 {
            candidates.retain(|&i| normalize(&self.countries[i].name).starts_with(key));
        }

        match candidates.as_slice() {
            [only] => Some(*only),
            _ => {
                debug!(query = key, matches = candidates.len(), "no unambiguous country match");
                None
            }
        }
    }
}

fn read_csv<T, R>(reader: R) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
    R: Read,
{
    let mut reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: T = record.context("Invalid reference table row")?;
        rows.push(row);
    }
    Ok(rows)
}

/// Lowercase, trim, collapse whitespace and fold common Latin accents.
fn normalize(value: &str) -> String {
    let folded: String = value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !('\u{0300}'..='\u{036f}').contains(c))
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'ā' | 'ă' | 'ą' | 'ạ' | 'ả' | 'ầ' | 'ậ' | 'ắ' | 'ằ' | 'ẵ' => 'a',
            'é' | 'è' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' | 'ế' | 'ề' | 'ệ' => 'e',
            'í' | 'ì' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'ı' | 'ị' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ø' | 'ō' | 'ő' | 'ơ' | 'ǒ' | 'ọ' | 'ồ' | 'ộ' | 'ớ' => 'o',
            'ú' | 'ù' | 'û' | 'ü' | 'ū' | 'ũ' | 'ŭ' | 'ů' | 'ű' | 'ų' | 'ư' | 'ừ' => 'u',
            'ý' => 'y',
            'ç' | 'ć' | 'ċ' | 'č' => 'c',
            'ď' | 'đ' | 'ḑ' => 'd',
            'ğ' | 'ġ' => 'g',
            'ħ' | 'ḥ' | 'ḩ' => 'h',
            'ķ' => 'k',
            'ļ' | 'ł' => 'l',
            'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
            'ř' | 'ṙ' | 'ṟ' => 'r',
            'ś' | 'ş' | 'š' | 'ș' => 's',
            'ţ' | 'ț' => 't',
            'ż' | 'ž' | 'ẕ' => 'z',
            '’' | '‘' | 'ʻ' => '\'',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}
