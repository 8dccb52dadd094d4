//! Agrégations statistiques et tendances horaires sur la télémétrie stockée.

use super::{StoreError, TelemetryStore};
use crate::models::{SensorChannel, Statistics, TelemetryRecord, TrendPoint};
use std::collections::BTreeMap;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, Time};

/// Statistiques sur les `hours` dernières heures, pour un canal ou les quatre
pub fn statistics(
    store: &dyn TelemetryStore,
    channel: Option<SensorChannel>,
    hours: i64,
) -> Result<Statistics, StoreError> {
    let records = store.records_since(window_start(OffsetDateTime::now_utc(), hours))?;
    Ok(summarize(&records, channel))
}

/// Moyennes horaires sur les `hours` dernières heures
pub fn trends(store: &dyn TelemetryStore, hours: i64) -> Result<Vec<TrendPoint>, StoreError> {
    let records = store.records_since(window_start(OffsetDateTime::now_utc(), hours))?;
    Ok(hourly_trends(&records))
}

/// Début de fenêtre, borné à la plus petite date représentable
pub fn window_start(now: OffsetDateTime, hours: i64) -> OffsetDateTime {
    hours
        .checked_mul(3600)
        .and_then(|secs| now.checked_sub(Duration::seconds(secs)))
        .unwrap_or_else(|| Date::MIN.with_time(Time::MIDNIGHT).assume_utc())
}

pub fn summarize(records: &[TelemetryRecord], channel: Option<SensorChannel>) -> Statistics {
    let mut stats = Statistics {
        count: records.len(),
        ..Default::default()
    };
    if records.is_empty() {
        return stats;
    }

    let channels: Vec<SensorChannel> = match channel {
        Some(c) => vec![c],
        None => SensorChannel::ALL.to_vec(),
    };

    for c in channels {
        let values = records.iter().map(|r| r.value(c));
        let min = values.clone().min();
        let max = values.clone().max();
        let mean = values.map(f64::from).sum::<f64>() / records.len() as f64;

        let (mean_slot, min_slot, max_slot) = match c {
            SensorChannel::Light => (&mut stats.light_mean, &mut stats.light_min, &mut stats.light_max),
            SensorChannel::Gas => (&mut stats.gas_mean, &mut stats.gas_min, &mut stats.gas_max),
            SensorChannel::Soil => (&mut stats.soil_mean, &mut stats.soil_min, &mut stats.soil_max),
            SensorChannel::Water => (&mut stats.water_mean, &mut stats.water_min, &mut stats.water_max),
        };
        *mean_slot = Some(mean);
        *min_slot = min;
        *max_slot = max;
    }

    stats
}

#[derive(Default)]
struct Bucket {
    light: i64,
    gas: i64,
    soil: i64,
    water: i64,
    count: usize,
}

pub fn hourly_trends(records: &[TelemetryRecord]) -> Vec<TrendPoint> {
    let format = format_description!("[year]-[month]-[day] [hour]:00");
    let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();

    for record in records {
        let Ok(hour) = record.timestamp.to_offset(time::UtcOffset::UTC).format(format) else {
            continue;
        };
        let bucket = buckets.entry(hour).or_default();
        bucket.light += i64::from(record.light);
        bucket.gas += i64::from(record.gas);
        bucket.soil += i64::from(record.soil);
        bucket.water += i64::from(record.water);
        bucket.count += 1;
    }

    buckets
        .into_iter()
        .map(|(hour, b)| {
            let n = b.count as f64;
            TrendPoint {
                hour,
                light: b.light as f64 / n,
                gas: b.gas as f64 / n,
                soil: b.soil as f64 / n,
                water: b.water as f64 / n,
                count: b.count,
            }
        })
        .collect()
}
