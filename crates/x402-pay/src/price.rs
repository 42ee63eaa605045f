use crate::X402Error;

/// Parse a human-readable price (`"$0.00005"`, `"0.01"`, `"$1"`) into integer minor units.
///
/// Integer-only: the whole and fractional parts are parsed separately and the
/// fraction is truncated to `decimals` digits. No floating point anywhere.
pub fn parse_price(price: &str, decimals: u32) -> Result<u128, X402Error> {
    let cleaned = price.trim().trim_start_matches('$').replace(',', "");
    if cleaned.is_empty() {
        return Err(X402Error::ConfigError(format!(
            "invalid price '{price}': no numeric content"
        )));
    }

    let (whole, frac) = cleaned.split_once('.').unwrap_or((cleaned.as_str(), ""));
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(X402Error::ConfigError(format!("invalid price '{price}'")));
    }

    let overflow = || X402Error::ConfigError(format!("invalid price '{price}': overflow"));
    let unit = 10u128.checked_pow(decimals).ok_or_else(overflow)?;

    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };

    let digits = decimals as usize;
    let frac = &frac[..frac.len().min(digits)];
    let frac_units: u128 = if frac.is_empty() {
        0
    } else {
        let padding = u32::try_from(digits - frac.len()).map_err(|_| overflow())?;
        frac.parse::<u128>()
            .map_err(|_| overflow())?
            .checked_mul(10u128.pow(padding))
            .ok_or_else(overflow)?
    };

    whole
        .checked_mul(unit)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(overflow)
}
