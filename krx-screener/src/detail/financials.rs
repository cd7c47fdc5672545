use krx_common::{clean_for_json, DataValue};

use crate::data::FundamentalRow;

/// Mean of each fundamental over `rows`, plus `ROE = EPS / BPS × 100`.
///
/// Missing values are left out of each mean; a column with no values is
/// `null`. ROE is `null` when either mean is missing or BPS is zero.
pub fn average_fundamentals(rows: &[FundamentalRow]) -> DataValue {
    let avg = |field: fn(&FundamentalRow) -> Option<f64>| -> Option<f64> {
        let values: Vec<f64> = rows.iter().filter_map(field).filter(|v| v.is_finite()).collect();
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
    };

    let bps = avg(|r| r.bps);
    let eps = avg(|r| r.eps);

    let roe = match (eps, bps) {
        (Some(eps), Some(bps)) if bps != 0.0 => Some(eps / bps * 100.0),
        _ => None,
    };

    clean_for_json(&DataValue::map([
        ("BPS", bps.into()),
        ("PER", avg(|r| r.per).into()),
        ("PBR", avg(|r| r.pbr).into()),
        ("EPS", eps.into()),
        ("DIV", avg(|r| r.div).into()),
        ("DPS", avg(|r| r.dps).into()),
        ("ROE", roe.into()),
    ]))
}
