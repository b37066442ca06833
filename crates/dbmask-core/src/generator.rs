//! The synthetic value generator capability.
//!
//! Column rules never produce random data themselves; they ask a
//! [`Generator`] for a value of a semantic kind (`email`, `uuid`, ...).
//! The engine instantiates a fresh generator per table so uniqueness
//! tracking never leaks across tables.

use std::collections::{HashMap, HashSet};

use rand::RngExt;

use crate::error::{CoreError, Result};
use crate::value::SqlValue;

/// Default probability that an optional rule yields its default value.
pub const DEFAULT_OPTIONAL_WEIGHT: f64 = 0.5;

/// Retries before a unique request is considered exhausted.
const MAX_UNIQUE_ATTEMPTS: usize = 1000;

/// A source of semantically-typed synthetic values.
///
/// `request` may be called any number of times per row. When `unique` is
/// set, the generator must never return the same value twice for that kind
/// within its own lifetime; running out of distinct values is a fatal
/// [`CoreError::UniqueValuesExhausted`].
pub trait Generator: Send {
    /// Produces a value of the given semantic kind.
    fn request(&mut self, kind: &str, params: &[SqlValue], unique: bool) -> Result<SqlValue>;

    /// Returns true with the given probability; drives optional rules.
    fn chance(&mut self, weight: f64) -> bool;
}

/// Locale-dependent wordlists used by [`FakeGenerator`].
struct Lexicon {
    first_names: &'static [&'static str],
    last_names: &'static [&'static str],
    cities: &'static [&'static str],
    words: &'static [&'static str],
    domains: &'static [&'static str],
}

static EN_US: Lexicon = Lexicon {
    first_names: &[
        "James", "Mary", "John", "Patricia", "Robert", "Jennifer", "Michael", "Linda", "David",
        "Elizabeth", "William", "Barbara", "Richard", "Susan", "Joseph", "Jessica",
    ],
    last_names: &[
        "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis",
        "Rodriguez", "Martinez", "Hernandez", "Lopez", "Gonzalez", "Wilson", "Anderson", "Thomas",
    ],
    cities: &[
        "Springfield", "Riverside", "Franklin", "Greenville", "Bristol", "Clinton", "Fairview",
        "Salem", "Madison", "Georgetown",
    ],
    words: &[
        "amber", "brook", "cedar", "delta", "ember", "frost", "grove", "harbor", "iris",
        "juniper", "kestrel", "larch", "meadow", "north", "opal", "pine",
    ],
    domains: &["example.com", "example.org", "example.net"],
};

static FR_FR: Lexicon = Lexicon {
    first_names: &[
        "Jean", "Marie", "Pierre", "Sophie", "Luc", "Camille", "Antoine", "Claire", "Hugo",
        "Manon", "Louis", "Julie", "Paul", "Emma", "Nicolas", "Alice",
    ],
    last_names: &[
        "Martin", "Bernard", "Dubois", "Thomas", "Robert", "Richard", "Petit", "Durand",
        "Leroy", "Moreau", "Simon", "Laurent", "Lefebvre", "Michel", "Garcia", "David",
    ],
    cities: &[
        "Lyon", "Nantes", "Lille", "Rennes", "Reims", "Dijon", "Angers", "Tours", "Brest",
        "Metz",
    ],
    words: &[
        "ambre", "brume", "cedre", "dune", "erable", "fleuve", "galet", "houx", "iris",
        "jonc", "lande", "menthe", "neige", "ocre", "pin", "quai",
    ],
    domains: &["exemple.fr", "exemple.org", "exemple.net"],
};

const LANGUAGE_CODES: &[&str] = &[
    "en", "fr", "de", "es", "it", "pt", "nl", "sv", "pl", "ja",
];

const TIMEZONES: &[&str] = &[
    "UTC",
    "Europe/Paris",
    "Europe/London",
    "Europe/Berlin",
    "America/New_York",
    "America/Chicago",
    "America/Los_Angeles",
    "Asia/Tokyo",
    "Asia/Singapore",
    "Australia/Sydney",
];

/// Default rand-backed generator with per-kind uniqueness tracking.
pub struct FakeGenerator {
    lexicon: &'static Lexicon,
    seen: HashMap<String, HashSet<String>>,
}

impl FakeGenerator {
    /// Creates a generator for the given locale (`en_US`, `fr_FR`).
    ///
    /// Unknown locales fall back to `en_US`.
    #[must_use]
    pub fn new(locale: &str) -> Self {
        let lexicon = if locale.starts_with("fr") {
            &FR_FR
        } else {
            &EN_US
        };
        Self {
            lexicon,
            seen: HashMap::new(),
        }
    }

    fn produce(&self, kind: &str, params: &[SqlValue]) -> Result<String> {
        let mut rng = rand::rng();
        let lex = self.lexicon;
        let value = match kind {
            "first_name" => pick(&mut rng, lex.first_names),
            "last_name" => pick(&mut rng, lex.last_names),
            "city" => pick(&mut rng, lex.cities),
            "word" => pick(&mut rng, lex.words),
            "language_code" => pick(&mut rng, LANGUAGE_CODES),
            "timezone" => pick(&mut rng, TIMEZONES),
            "user_name" => format!(
                "{}.{}{}",
                pick(&mut rng, lex.first_names).to_lowercase(),
                pick(&mut rng, lex.last_names).to_lowercase(),
                rng.random_range(0..10_000u32)
            ),
            "email" => format!(
                "{}.{}{}@{}",
                pick(&mut rng, lex.first_names).to_lowercase(),
                pick(&mut rng, lex.last_names).to_lowercase(),
                rng.random_range(0..10_000u32),
                pick(&mut rng, lex.domains)
            ),
            "uuid" => uuid_v4(&mut rng),
            "ipv4" => format!(
                "{}.{}.{}.{}",
                rng.random_range(1..255u8),
                rng.random_range(0..=255u8),
                rng.random_range(0..=255u8),
                rng.random_range(1..255u8)
            ),
            "phone_number" => format!(
                "+{}{:09}",
                rng.random_range(1..100u32),
                rng.random_range(0..1_000_000_000u32)
            ),
            "sentence" => {
                let count = rng.random_range(4..9usize);
                let mut words: Vec<&str> = Vec::with_capacity(count);
                for _ in 0..count {
                    words.push(pick_ref(&mut rng, lex.words));
                }
                format!("{}.", words.join(" "))
            }
            "iso8601" => iso8601(&mut rng, params.first()),
            _ => return Err(CoreError::UnknownGeneratorKind(String::from(kind))),
        };
        Ok(value)
    }
}

impl Generator for FakeGenerator {
    fn request(&mut self, kind: &str, params: &[SqlValue], unique: bool) -> Result<SqlValue> {
        if !unique {
            return Ok(SqlValue::Text(self.produce(kind, params)?));
        }

        for _ in 0..MAX_UNIQUE_ATTEMPTS {
            let candidate = self.produce(kind, params)?;
            let seen = self.seen.entry(String::from(kind)).or_default();
            if seen.insert(candidate.clone()) {
                return Ok(SqlValue::Text(candidate));
            }
        }
        Err(CoreError::UniqueValuesExhausted {
            kind: String::from(kind),
        })
    }

    fn chance(&mut self, weight: f64) -> bool {
        rand::rng().random_bool(weight.clamp(0.0, 1.0))
    }
}

fn pick<R: RngExt>(rng: &mut R, list: &[&str]) -> String {
    String::from(list[rng.random_range(0..list.len())])
}

fn pick_ref<'a, R: RngExt>(rng: &mut R, list: &[&'a str]) -> &'a str {
    list[rng.random_range(0..list.len())]
}

fn uuid_v4<R: RngExt>(rng: &mut R) -> String {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    // Version 4, RFC 4122 variant.
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Random ISO-8601 timestamp, optionally bounded above by a parseable
/// timestamp parameter (the original rows' `updated_at`, typically).
fn iso8601<R: RngExt>(rng: &mut R, upper: Option<&SqlValue>) -> String {
    const FLOOR: i64 = 946_684_800; // 2000-01-01T00:00:00Z
    let max = upper
        .and_then(|v| v.as_text())
        .and_then(parse_timestamp)
        .unwrap_or_else(|| chrono::Utc::now().timestamp());
    let max = max.max(FLOOR + 1);
    let secs = rng.random_range(FLOOR..max);
    chrono::DateTime::from_timestamp(secs, 0)
        .unwrap_or_default()
        .to_rfc3339()
}

fn parse_timestamp(text: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.timestamp())
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .map(|dt| dt.and_utc().timestamp())
                .ok()
        })
}
