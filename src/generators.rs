//! Registered data-generator functions available inside placeholders.
//!
//! The registry is a fixed table built once at startup; the resolver looks
//! a call's head up here before falling back to the general expression
//! evaluator. Every generator takes its arguments positionally as JSON
//! values and returns a JSON value.

use anyhow::{anyhow, bail, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, Local};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use uuid::Uuid;

pub type GeneratorFn = fn(&[Value]) -> Result<Value>;

/// Name → callable table consulted by the placeholder resolver.
pub struct GeneratorRegistry {
    table: BTreeMap<&'static str, GeneratorFn>,
}

impl GeneratorRegistry {
    /// Build the registry with all built-in generators.
    pub fn new() -> Self {
        let mut table: BTreeMap<&'static str, GeneratorFn> = BTreeMap::new();
        table.insert("generate_random_int", generate_random_int);
        table.insert("generate_name", generate_name);
        table.insert("generate_female_name", generate_female_name);
        table.insert("generate_male_name", generate_male_name);
        table.insert("generate_email", generate_email);
        table.insert("generate_phone", generate_phone);
        table.insert("generate_identifier", generate_identifier);
        table.insert("generate_uuid", generate_uuid);
        table.insert("generate_time", generate_time);
        table.insert("generate_today_date", generate_today_date);
        table.insert("generate_time_after_week", generate_time_after_week);
        table.insert("generate_iso_8601_time", generate_iso_8601_time);
        table.insert("list_to_str", list_to_str);
        table.insert("str_to_list", str_to_list);
        table.insert("string_to_base64", string_to_base64);
        table.insert("base64_decode", base64_decode);
        table.insert("split_data", split_data);
        Self { table }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        let func = self
            .table
            .get(name)
            .ok_or_else(|| anyhow!("unknown generator function: {name}"))?;
        func(args)
    }

    /// Register an additional generator; an existing name is replaced.
    pub fn register(&mut self, name: &'static str, func: GeneratorFn) {
        self.table.insert(name, func);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.table.keys().copied()
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn arg_str(args: &[Value], index: usize) -> Option<&str> {
    args.get(index).and_then(Value::as_str)
}

fn arg_i64(args: &[Value], index: usize) -> Option<i64> {
    args.get(index).and_then(Value::as_i64)
}

/// With no arguments, a random integer in `[0, 5000]`; otherwise the
/// bounds are the minimum and maximum of the numeric arguments.
fn generate_random_int(args: &[Value]) -> Result<Value> {
    let mut rng = rand::thread_rng();
    if args.is_empty() {
        return Ok(Value::from(rng.gen_range(0..=5000)));
    }
    let numbers: Vec<i64> = args.iter().filter_map(Value::as_i64).collect();
    if numbers.len() != args.len() {
        bail!("generate_random_int arguments must be integers");
    }
    let min = *numbers.iter().min().expect("non-empty");
    let max = *numbers.iter().max().expect("non-empty");
    Ok(Value::from(rng.gen_range(min..=max)))
}

const FAMILY_NAMES: &[&str] = &[
    "Anderson", "Bailey", "Carter", "Diaz", "Ellis", "Foster", "Griffin", "Hayes", "Jennings",
    "Keller", "Lambert", "Morgan", "Norris", "Osborne", "Parker", "Reyes",
];
const FEMALE_GIVEN: &[&str] = &[
    "Alice", "Bella", "Clara", "Daisy", "Elena", "Fiona", "Grace", "Hannah", "Iris", "Julia",
    "Laura", "Mabel", "Nina", "Olivia", "Paula", "Rosa",
];
const MALE_GIVEN: &[&str] = &[
    "Aaron", "Brian", "Caleb", "Derek", "Ethan", "Felix", "Gavin", "Henry", "Isaac", "Jonas",
    "Kevin", "Liam", "Mason", "Nolan", "Oscar", "Peter",
];
const ZH_FAMILY: &[&str] = &["王", "李", "张", "刘", "陈", "杨", "赵", "黄", "周", "吴"];
const ZH_FEMALE_GIVEN: &[&str] = &["芳", "娜", "敏", "静", "艳", "娟", "霞", "秀英"];
const ZH_MALE_GIVEN: &[&str] = &["伟", "磊", "军", "勇", "涛", "明", "超", "刚"];

fn is_zh(args: &[Value]) -> bool {
    arg_str(args, 0) == Some("zh")
}

fn pick<'a>(rng: &mut impl Rng, pool: &[&'a str]) -> &'a str {
    pool.choose(rng).copied().expect("name pools are non-empty")
}

fn compose_name(zh: bool, given_pool: &[&str], zh_given_pool: &[&str]) -> String {
    let mut rng = rand::thread_rng();
    if zh {
        format!("{}{}", pick(&mut rng, ZH_FAMILY), pick(&mut rng, zh_given_pool))
    } else {
        format!(
            "{} {}",
            pick(&mut rng, given_pool),
            pick(&mut rng, FAMILY_NAMES)
        )
    }
}

fn generate_name(args: &[Value]) -> Result<Value> {
    let zh = is_zh(args);
    let pool = if rand::thread_rng().gen_bool(0.5) {
        (FEMALE_GIVEN, ZH_FEMALE_GIVEN)
    } else {
        (MALE_GIVEN, ZH_MALE_GIVEN)
    };
    Ok(Value::String(compose_name(zh, pool.0, pool.1)))
}

fn generate_female_name(args: &[Value]) -> Result<Value> {
    Ok(Value::String(compose_name(
        is_zh(args),
        FEMALE_GIVEN,
        ZH_FEMALE_GIVEN,
    )))
}

fn generate_male_name(args: &[Value]) -> Result<Value> {
    Ok(Value::String(compose_name(
        is_zh(args),
        MALE_GIVEN,
        ZH_MALE_GIVEN,
    )))
}

fn generate_email(_args: &[Value]) -> Result<Value> {
    const DOMAINS: &[&str] = &["example.com", "example.org", "example.net", "test.dev"];
    let mut rng = rand::thread_rng();
    let given_pool = if rng.gen_bool(0.5) { FEMALE_GIVEN } else { MALE_GIVEN };
    let given = pick(&mut rng, given_pool);
    let family = pick(&mut rng, FAMILY_NAMES);
    let number: u16 = rng.gen_range(1..1000);
    Ok(Value::String(format!(
        "{}.{}{}@{}",
        given.to_ascii_lowercase(),
        family.to_ascii_lowercase(),
        number,
        pick(&mut rng, DOMAINS)
    )))
}

fn generate_phone(args: &[Value]) -> Result<Value> {
    let mut rng = rand::thread_rng();
    let phone = if is_zh(args) {
        let second = ['3', '5', '7', '8', '9'][rng.gen_range(0..5)];
        let mut digits = String::new();
        for _ in 0..9 {
            digits.push(char::from(b'0' + rng.gen_range(0..10u8)));
        }
        format!("1{second}{digits}")
    } else {
        format!(
            "+1-{:03}-{:03}-{:04}",
            rng.gen_range(200..1000),
            rng.gen_range(0..1000),
            rng.gen_range(0..10000)
        )
    };
    Ok(Value::String(phone))
}

/// Random identifier of digits, letters, `_`, `-` and `.`, starting and
/// ending with an alphanumeric character. The optional second argument
/// controls the length (default 8, minimum 2).
fn generate_identifier(args: &[Value]) -> Result<Value> {
    const MIDDLE: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_.-";
    const EDGE: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let len = arg_i64(args, 1)
        .or_else(|| arg_i64(args, 0))
        .unwrap_or(8)
        .max(2) as usize;
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(len);
    for position in 0..len {
        let pool = if position == 0 || position == len - 1 {
            EDGE
        } else {
            MIDDLE
        };
        out.push(char::from(pool[rng.gen_range(0..pool.len())]));
    }
    Ok(Value::String(out))
}

fn generate_uuid(_args: &[Value]) -> Result<Value> {
    Ok(Value::String(Uuid::new_v4().to_string()))
}

/// Format the local time shifted by a day offset. String arguments are
/// taken as the strftime format, integer arguments as the offset, in any
/// order; defaults are `%Y-%m-%d %H:%M:%S` and no offset.
fn generate_time(args: &[Value]) -> Result<Value> {
    let fmt = args
        .iter()
        .find_map(Value::as_str)
        .unwrap_or("%Y-%m-%d %H:%M:%S");
    let days = args.iter().find_map(Value::as_i64).unwrap_or(0);
    let moment = Local::now() + Duration::days(days);
    format_time(&moment.naive_local(), fmt)
}

fn generate_today_date(args: &[Value]) -> Result<Value> {
    let fmt = arg_str(args, 0).unwrap_or("%Y-%m-%d");
    let today = Local::now().date_naive();
    if fmt == "%Y-%m-%d %H:%M:%S" {
        return Ok(Value::String(format!("{today} 00:00:00")));
    }
    format_date(&today, fmt)
}

fn generate_time_after_week(args: &[Value]) -> Result<Value> {
    let fmt = arg_str(args, 0).unwrap_or("%Y-%m-%d");
    let day = Local::now().date_naive() + Duration::days(6);
    if fmt == "%Y-%m-%d %H:%M:%S" {
        return Ok(Value::String(format!(
            "{} 00:00:00",
            day.format("%Y-%m-%d")
        )));
    }
    format_date(&day, fmt)
}

fn generate_iso_8601_time(args: &[Value]) -> Result<Value> {
    let days = arg_i64(args, 0).unwrap_or(0);
    let moment = Local::now().naive_local() + Duration::days(days);
    Ok(Value::String(format!(
        "{}Z",
        moment.format("%Y-%m-%dT%H:%M:%S%.3f")
    )))
}

// chrono panics through Display on a bad strftime spec; go through
// write! so a malformed format degrades to a resolution failure.
fn format_time(moment: &chrono::NaiveDateTime, fmt: &str) -> Result<Value> {
    let mut out = String::new();
    write!(out, "{}", moment.format(fmt)).map_err(|_| anyhow!("invalid time format: {fmt}"))?;
    Ok(Value::String(out))
}

fn format_date(day: &chrono::NaiveDate, fmt: &str) -> Result<Value> {
    let mut out = String::new();
    write!(out, "{}", day.format(fmt)).map_err(|_| anyhow!("invalid date format: {fmt}"))?;
    Ok(Value::String(out))
}

/// Join list elements with commas, skipping nulls; a string passes
/// through; anything else yields null.
fn list_to_str(args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(Value::Array(items)) if !items.is_empty() => {
            let joined = items
                .iter()
                .filter(|item| !item.is_null())
                .map(plain_text)
                .collect::<Vec<_>>()
                .join(",");
            Ok(Value::String(joined))
        }
        Some(Value::String(s)) if !s.is_empty() => Ok(Value::String(s.clone())),
        _ => Ok(Value::Null),
    }
}

fn str_to_list(args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(Value::String(s)) => Ok(Value::Array(vec![Value::String(s.clone())])),
        Some(other) => Ok(other.clone()),
        None => Ok(Value::Null),
    }
}

fn string_to_base64(args: &[Value]) -> Result<Value> {
    let input = arg_str(args, 0).ok_or_else(|| anyhow!("string_to_base64 expects a string"))?;
    Ok(Value::String(BASE64.encode(input.as_bytes())))
}

fn base64_decode(args: &[Value]) -> Result<Value> {
    let input = arg_str(args, 0).ok_or_else(|| anyhow!("base64_decode expects a string"))?;
    let bytes = BASE64.decode(input.as_bytes())?;
    Ok(Value::String(String::from_utf8(bytes)?))
}

/// `split_data(target, separator, start[, end])`: split the target and
/// return the piece at `start`, or the pieces in `[start, end)` when an
/// end index is given. Negative indices count from the end.
fn split_data(args: &[Value]) -> Result<Value> {
    let target = arg_str(args, 0).ok_or_else(|| anyhow!("split_data target must be a string"))?;
    let separator =
        arg_str(args, 1).ok_or_else(|| anyhow!("split_data separator must be a string"))?;
    let start = arg_i64(args, 2).ok_or_else(|| anyhow!("split_data start index is required"))?;
    let pieces: Vec<&str> = target.split(separator).collect();

    let index = |raw: i64| -> Result<usize> {
        let idx = if raw < 0 { raw + pieces.len() as i64 } else { raw };
        if idx < 0 || idx as usize > pieces.len() {
            bail!("split_data index {raw} out of range for {} pieces", pieces.len());
        }
        Ok(idx as usize)
    };

    match arg_i64(args, 3) {
        Some(end) => {
            let start = index(start)?;
            let end = index(end)?.max(start);
            Ok(Value::Array(
                pieces[start..end]
                    .iter()
                    .map(|piece| Value::String((*piece).to_string()))
                    .collect(),
            ))
        }
        None => {
            let start = index(start)?;
            let piece = pieces
                .get(start)
                .ok_or_else(|| anyhow!("split_data index {start} out of range"))?;
            Ok(Value::String((*piece).to_string()))
        }
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
