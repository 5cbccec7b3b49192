//! Linear release of a stream's deposit over its active window.

/// Shares accrued at `now` out of `deposited` released linearly over
/// `[start_time, end_time]`, rounded down.
///
/// Zero at or before `start_time`, the full deposit at or after `end_time`.
/// With `deposited = q * duration + r` the result is `q * elapsed +
/// r * elapsed / duration`, which equals `floor(deposited * elapsed /
/// duration)` without forming that product.
pub fn accrued_shares(deposited: i128, start_time: u64, end_time: u64, now: u64) -> i128 {
    if now <= start_time {
        return 0;
    }
    if now >= end_time {
        return deposited;
    }

    let elapsed = now - start_time;
    let duration = end_time - start_time;
    let whole = deposited / duration as i128;
    let rest = (deposited % duration as i128) as u128;

    // rest < duration and elapsed < duration, so the product fits in u128.
    whole * elapsed as i128 + (rest * elapsed as u128 / duration as u128) as i128
}
