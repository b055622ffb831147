//! Data loading from gateway, city and data-center files

use crate::{AssetError, City, DataCenter, GeoLocation, GroundStation, Result, DENSITY_SCALE};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

/// Raw gateway record from JSON
#[derive(Debug, Deserialize)]
struct RawGateway {
    town: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
}

/// Load ground stations (gateways) from a JSON file.
///
/// Accepts either a bare array or an object with a `gateways` field.
/// Records without usable coordinates are skipped.
pub fn load_gateways(path: impl AsRef<Path>) -> Result<Vec<GroundStation>> {
    let path = path.as_ref();
    info!("Loading gateways from {:?}", path);

    let reader = BufReader::new(File::open(path)?);
    let raw: serde_json::Value = serde_json::from_reader(reader)?;

    let records: Vec<RawGateway> = if let Some(gw) = raw.get("gateways") {
        serde_json::from_value(gw.clone())?
    } else if raw.is_array() {
        serde_json::from_value(raw)?
    } else {
        return Err(AssetError::Empty(path.to_path_buf()));
    };

    let mut stations = Vec::with_capacity(records.len());
    let mut skipped = 0;

    for (i, record) in records.into_iter().enumerate() {
        let location = match (record.lat, record.lng) {
            (Some(lat), Some(lng)) => GeoLocation::new(lat, lng),
            _ => {
                skipped += 1;
                continue;
            }
        };
        if !location.is_valid() {
            skipped += 1;
            continue;
        }

        stations.push(GroundStation {
            index: stations.len(),
            name: record.town.unwrap_or_else(|| format!("gw-{}", i)),
            location,
        });
    }

    if skipped > 0 {
        warn!("Skipped {} gateways with missing or invalid coordinates", skipped);
    }
    info!("Loaded {} gateways", stations.len());

    if stations.is_empty() {
        return Err(AssetError::Empty(path.to_path_buf()));
    }
    Ok(stations)
}

fn parse_field<T: FromStr>(path: &Path, line: usize, field: &str, what: &str) -> Result<T> {
    field.trim().parse().map_err(|_| AssetError::Malformed {
        path: path.to_path_buf(),
        line,
        reason: format!("invalid {} {:?}", what, field),
    })
}

/// Read non-blank tab-separated rows, each with at least `min_fields` fields.
/// Yields (1-based line number, fields).
fn read_tsv(path: &Path, min_fields: usize) -> Result<Vec<(usize, Vec<String>)>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<String> = line.split('\t').map(str::to_string).collect();
        if fields.len() < min_fields {
            return Err(AssetError::Malformed {
                path: path.to_path_buf(),
                line: i + 1,
                reason: format!("expected at least {} fields, found {}", min_fields, fields.len()),
            });
        }
        rows.push((i + 1, fields));
    }

    if rows.is_empty() {
        return Err(AssetError::Empty(path.to_path_buf()));
    }
    Ok(rows)
}

/// Load cities from a tab-separated file.
///
/// The last four fields of every row are `lat, lon, population, user_type`;
/// leading fields, if any, are joined into the city name.
pub fn load_cities(path: impl AsRef<Path>) -> Result<Vec<City>> {
    let path = path.as_ref();
    info!("Loading cities from {:?}", path);

    let rows = read_tsv(path, 4)?;
    let mut cities = Vec::with_capacity(rows.len());

    for (line, fields) in rows {
        let n = fields.len();
        let lat: f64 = parse_field(path, line, &fields[n - 4], "latitude")?;
        let lon: f64 = parse_field(path, line, &fields[n - 3], "longitude")?;
        let population: u64 = parse_field(path, line, &fields[n - 2], "population")?;
        let user_type: u8 = parse_field(path, line, &fields[n - 1], "user type")?;

        let location = GeoLocation::new(lat, lon);
        if !location.is_valid() {
            return Err(AssetError::Malformed {
                path: path.to_path_buf(),
                line,
                reason: format!("coordinates out of range ({}, {})", lat, lon),
            });
        }

        let density = u32::try_from(population / DENSITY_SCALE).map_err(|_| AssetError::Malformed {
            path: path.to_path_buf(),
            line,
            reason: format!("population {} too large", population),
        })?;

        let name = if n > 4 {
            fields[..n - 4].join(" ")
        } else {
            format!("city-{}", cities.len())
        };

        cities.push(City {
            index: cities.len(),
            name,
            location,
            density,
            user_type,
        });
    }

    info!("Loaded {} cities", cities.len());
    Ok(cities)
}

/// Load data centers from a tab-separated file whose last two fields are `lat, lon`
pub fn load_data_centers(path: impl AsRef<Path>) -> Result<Vec<DataCenter>> {
    let path = path.as_ref();
    info!("Loading data centers from {:?}", path);

    let rows = read_tsv(path, 2)?;
    let mut dcs = Vec::with_capacity(rows.len());

    for (line, fields) in rows {
        let n = fields.len();
        let lat: f64 = parse_field(path, line, &fields[n - 2], "latitude")?;
        let lon: f64 = parse_field(path, line, &fields[n - 1], "longitude")?;
        dcs.push(DataCenter {
            index: dcs.len(),
            location: GeoLocation::new(lat, lon),
        });
    }

    info!("Loaded {} data centers", dcs.len());
    Ok(dcs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_gateways() {
        let file = write_temp(
            r#"[
                {"town": "Hawthorne", "lat": 33.92, "lng": -118.33},
                {"town": "No Coords"},
                {"town": "Bad", "lat": 120.0, "lng": 0.0},
                {"lat": 47.6, "lng": -122.3}
            ]"#,
        );

        let stations = load_gateways(file.path()).unwrap();
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].name, "Hawthorne");
        assert_eq!(stations[1].index, 1);
        assert_eq!(stations[1].name, "gw-3");
    }

    #[test]
    fn test_load_gateways_wrapped() {
        let file = write_temp(r#"{"gateways": [{"town": "Redmond", "lat": 47.67, "lng": -122.12}]}"#);
        let stations = load_gateways(file.path()).unwrap();
        assert_eq!(stations.len(), 1);
    }

    #[test]
    fn test_load_cities() {
        let file = write_temp("Tokyo\tJP\t35.68\t139.69\t37400000\t1\n6.52\t3.37\t1500\t0\n\n");

        let cities = load_cities(file.path()).unwrap();
        assert_eq!(cities.len(), 2);
        assert_eq!(cities[0].name, "Tokyo JP");
        assert_eq!(cities[0].density, 37400);
        assert_eq!(cities[0].user_type, 1);
        assert_eq!(cities[1].name, "city-1");
        assert_eq!(cities[1].density, 1);
    }

    #[test]
    fn test_load_cities_short_row() {
        let file = write_temp("Tokyo\t35.68\t139.69\t37400000\t1\nBroken\t1.0\t2.0\n");

        match load_cities(file.path()) {
            Err(AssetError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed row, got {:?}", other),
        }
    }

    #[test]
    fn test_load_cities_bad_number() {
        let file = write_temp("Tokyo\t35.68\t139.69\tmany\t1\n");
        assert!(matches!(
            load_cities(file.path()),
            Err(AssetError::Malformed { line: 1, .. })
        ));
    }

    #[test]
    fn test_load_data_centers() {
        let file = write_temp("dc-a\tAshburn\t39.04\t-77.49\n51.5\t-0.1\n");
        let dcs = load_data_centers(file.path()).unwrap();
        assert_eq!(dcs.len(), 2);
        assert_eq!(dcs[1].location, GeoLocation::new(51.5, -0.1));
    }
}
