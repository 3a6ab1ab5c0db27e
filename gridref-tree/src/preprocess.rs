//! Corrections applied to a fragment before it is grouped.

use gridref_error::{GridRefResult, gridref_bail, gridref_err};
use gridref_refs::zarr::COORDINATES;
use gridref_refs::{ArrayMetadata, CoordValue, InlineValue, RefStore, RefValue, ReferenceFragment};
use jiff::tz::TimeZone;
use jiff::{Timestamp, civil};
use serde_json::{Value, json};

const STEP: &str = "step";

/// Redefine the `step` coordinate of `fragment` as `valid_time - time` in fractional hours.
///
/// Sub-hourly products report a step that loses the minutes. The result is a modified copy and
/// `step` is added to the group coordinates when missing.
pub fn correct_step_hours(fragment: &ReferenceFragment) -> GridRefResult<ReferenceFragment> {
    let mut fragment = fragment.clone();
    fragment.set_document(
        "step/.zarray",
        &ArrayMetadata::single_chunk(vec![], "<f8", json!("NaN")),
    )?;
    fragment.set_document(
        "step/.zattrs",
        &json!({
            "_ARRAY_DIMENSIONS": [],
            "long_name": "time since forecast_reference_time",
            "standard_name": "forecast_period",
            "units": "hours",
        }),
    )?;

    let mut attrs = fragment.group_attrs()?;
    let mut coordinates = fragment.coordinates()?;
    if !coordinates.iter().any(|name| name == STEP) {
        coordinates.push(STEP.to_string());
        attrs.insert(COORDINATES.to_string(), Value::String(coordinates.join(" ")));
        fragment.set_document(".zattrs", &attrs)?;
    }

    let hours = (seconds(&fragment, "valid_time")? - seconds(&fragment, "time")?) / 3_600.0;
    fragment.refs.insert(
        format!("{STEP}/0"),
        RefValue::Inline(InlineValue::encode(&hours.to_le_bytes())),
    );
    Ok(fragment)
}

/// The scalar time coordinate `name` in seconds since the unix epoch.
///
/// Numeric encodings follow the CF `units` attribute, e.g. `hours since 2024-01-01T00:00:00`. A
/// reference date without an offset is read as UTC; without a reference date the value is a
/// plain duration.
fn seconds(fragment: &ReferenceFragment, name: &str) -> GridRefResult<f64> {
    let value = fragment
        .read_element(name, &[])?
        .ok_or_else(|| gridref_err!(Structure: "scalar coordinate {} has no value", name))?;
    if let CoordValue::DateTime(..) | CoordValue::TimeDelta(..) = value {
        return Ok(value.as_f64());
    }

    let attrs = fragment.attributes(Some(name))?.unwrap_or_default();
    let units = attrs.get("units").and_then(Value::as_str).unwrap_or("seconds");
    let (unit, epoch) = match units.split_once(" since ") {
        Some((unit, reference)) => (unit.trim(), reference_seconds(name, reference.trim())?),
        None => (units.trim(), 0.0),
    };
    let scale = match unit {
        "days" => 86_400.0,
        "hours" => 3_600.0,
        "minutes" => 60.0,
        "seconds" => 1.0,
        other => gridref_bail!(Structure: "unsupported time unit {} for {}", other, name),
    };
    Ok(value.as_f64() * scale + epoch)
}

fn reference_seconds(name: &str, reference: &str) -> GridRefResult<f64> {
    let timestamp = match reference.parse::<Timestamp>() {
        Ok(timestamp) => timestamp,
        Err(_) => reference
            .parse::<civil::DateTime>()
            .and_then(|datetime| datetime.to_zoned(TimeZone::UTC))
            .map(|zoned| zoned.timestamp())
            .map_err(|err| {
                gridref_err!(Structure: "invalid reference date {} for {}: {}", reference, name, err)
            })?,
    };
    Ok(timestamp.as_millisecond() as f64 / 1_000.0)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_util::{fragment, set_coordinate};

    fn subhourly(time: f64, valid_time: f64, coordinates: &str) -> ReferenceFragment {
        let mut fragment = fragment(
            "t2m",
            json!({"GRIB_stepType": "instant", "GRIB_typeOfLevel": "heightAboveGround"}),
            coordinates,
        );
        set_coordinate(&mut fragment, "time", &[], &[time]);
        set_coordinate(&mut fragment, "valid_time", &[], &[valid_time]);
        fragment
    }

    #[rstest]
    #[case("time step valid_time latitude longitude", 900.0, 0.25)]
    #[case("time valid_time latitude longitude", 5_400.0, 1.5)]
    fn step_in_fractional_hours(#[case] coordinates: &str, #[case] offset: f64, #[case] hours: f64) {
        let original = subhourly(1_700_000_000.0, 1_700_000_000.0 + offset, coordinates);
        let corrected = correct_step_hours(&original).unwrap();

        assert_eq!(
            corrected.read_element("step", &[]).unwrap(),
            Some(CoordValue::Float(hours))
        );
        assert_eq!(
            corrected.coordinates().unwrap().iter().filter(|c| *c == "step").count(),
            1
        );
        let attrs = corrected.attributes(Some("step")).unwrap().unwrap();
        assert_eq!(attrs["units"], json!("hours"));
    }

    fn with_encoded_time(fragment: &mut ReferenceFragment, name: &str, value: i64, units: &str) {
        fragment
            .set_document(
                format!("{name}/.zarray"),
                &ArrayMetadata::single_chunk(vec![], "<i8", Value::Null),
            )
            .unwrap();
        fragment
            .set_document(
                format!("{name}/.zattrs"),
                &json!({"_ARRAY_DIMENSIONS": [], "units": units}),
            )
            .unwrap();
        fragment.refs.insert(
            format!("{name}/0"),
            RefValue::Inline(InlineValue::encode(&value.to_le_bytes())),
        );
    }

    #[rstest]
    #[case(0, "minutes since 2024-01-01T00:00:00", 45, "minutes since 2024-01-01T00:00:00", 0.75)]
    #[case(0, "hours since 2024-01-01T00:00:00", 0, "hours since 2024-01-01T01:00:00", 1.0)]
    #[case(60, "minutes since 2024-01-01", 0, "hours since 2024-01-01T02:00:00Z", 1.0)]
    #[case(1_704_067_200, "seconds since 1970-01-01 00:00:00", 15, "minutes since 2024-01-01T00:00:00+00:00", 0.25)]
    fn encoded_times_use_units_and_reference_dates(
        #[case] time: i64,
        #[case] time_units: &str,
        #[case] valid_time: i64,
        #[case] valid_time_units: &str,
        #[case] hours: f64,
    ) {
        let mut fragment = subhourly(0.0, 0.0, "time valid_time latitude longitude");
        with_encoded_time(&mut fragment, "time", time, time_units);
        with_encoded_time(&mut fragment, "valid_time", valid_time, valid_time_units);
        let corrected = correct_step_hours(&fragment).unwrap();
        assert_eq!(
            corrected.read_element("step", &[]).unwrap(),
            Some(CoordValue::Float(hours))
        );
    }

    #[rstest]
    #[case("hours since yesterday")]
    #[case("fortnights since 2024-01-01")]
    fn unreadable_units(#[case] units: &str) {
        let mut fragment = subhourly(0.0, 0.0, "time valid_time latitude longitude");
        with_encoded_time(&mut fragment, "time", 0, units);
        let err = correct_step_hours(&fragment).unwrap_err();
        assert!(matches!(err, gridref_error::GridRefError::Structure(..)));
    }

    #[test]
    fn requires_time_coordinates() {
        let mut fragment = subhourly(0.0, 900.0, "time valid_time latitude longitude");
        fragment.refs.retain(|key, _| !key.starts_with("valid_time/"));
        assert!(correct_step_hours(&fragment).is_err());
    }
}
