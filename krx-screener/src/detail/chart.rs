use krx_common::{clean_for_json, DataValue};

use crate::data::Candle;
use crate::indicators::IndicatorSet;

/// One chart point per session.
///
/// Keys: `date` (`YYYY-MM-DD`), `open`, `high`, `low`, `close`, `volume`,
/// `MA5`, `MA20`, `BB_Upper`, `BB_Mid`, `BB_Lower`. Overlays are `null`
/// until their window fills; non-finite values are `null` as well.
pub fn chart_points(candles: &[Candle]) -> DataValue {
    let set = IndicatorSet::compute(candles);

    let points = candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            DataValue::map([
                ("date", DataValue::from(c.date.format("%Y-%m-%d").to_string())),
                ("open", c.open.into()),
                ("high", c.high.into()),
                ("low", c.low.into()),
                ("close", c.close.into()),
                ("volume", c.volume.into()),
                ("MA5", set.ma5[i].into()),
                ("MA20", set.ma20[i].into()),
                ("BB_Upper", set.bands.upper[i].into()),
                ("BB_Mid", set.bands.mid[i].into()),
                ("BB_Lower", set.bands.lower[i].into()),
            ])
        })
        .collect();

    clean_for_json(&DataValue::List(points))
}
