//! Runtime helpers linked against compiled kernels.
//!
//! These are C-ABI functions so the ABI stays stable across backends; the
//! in-process engine dispatches to them directly and an accelerator backend
//! links the same symbols. Null-aware arithmetic propagates the
//! type-specific sentinel passed by the compiled code.

/// `a + b`, propagating the null sentinel.
#[no_mangle]
pub extern "C" fn add_i64_nullable(a: i64, b: i64, null_val: i64) -> i64 {
    if a == null_val || b == null_val {
        return null_val;
    }
    a.wrapping_add(b)
}

#[no_mangle]
pub extern "C" fn sub_i64_nullable(a: i64, b: i64, null_val: i64) -> i64 {
    if a == null_val || b == null_val {
        return null_val;
    }
    a.wrapping_sub(b)
}

#[no_mangle]
pub extern "C" fn mul_i64_nullable(a: i64, b: i64, null_val: i64) -> i64 {
    if a == null_val || b == null_val {
        return null_val;
    }
    a.wrapping_mul(b)
}

/// Division by zero is checked by the emitted IR before this runs.
#[no_mangle]
pub extern "C" fn div_i64_nullable(a: i64, b: i64, null_val: i64) -> i64 {
    if a == null_val || b == null_val {
        return null_val;
    }
    a.wrapping_div(b)
}

#[no_mangle]
pub extern "C" fn mod_i64_nullable(a: i64, b: i64, null_val: i64) -> i64 {
    if a == null_val || b == null_val {
        return null_val;
    }
    a.wrapping_rem(b)
}

#[no_mangle]
pub extern "C" fn add_double_nullable(a: f64, b: f64, null_val: f64) -> f64 {
    if a == null_val || b == null_val {
        return null_val;
    }
    a + b
}

#[no_mangle]
pub extern "C" fn sub_double_nullable(a: f64, b: f64, null_val: f64) -> f64 {
    if a == null_val || b == null_val {
        return null_val;
    }
    a - b
}

#[no_mangle]
pub extern "C" fn mul_double_nullable(a: f64, b: f64, null_val: f64) -> f64 {
    if a == null_val || b == null_val {
        return null_val;
    }
    a * b
}

#[no_mangle]
pub extern "C" fn div_double_nullable(a: f64, b: f64, null_val: f64) -> f64 {
    if a == null_val || b == null_val {
        return null_val;
    }
    a / b
}

/// Comparison result encoding: 0 false, 1 true, `bool_null` for null
/// operands.
pub const BOOLEAN_NULL: i64 = i8::MIN as i64;

#[no_mangle]
pub extern "C" fn cmp_i64_nullable(op: i32, a: i64, b: i64, null_val: i64) -> i64 {
    if a == null_val || b == null_val {
        return BOOLEAN_NULL;
    }
    let r = match op {
        0 => a == b,
        1 => a != b,
        2 => a < b,
        3 => a <= b,
        4 => a > b,
        5 => a >= b,
        _ => unreachable!("bad comparison op code"),
    };
    r as i64
}

#[no_mangle]
pub extern "C" fn cmp_double_nullable(op: i32, a: f64, b: f64, null_val: f64) -> i64 {
    if a == null_val || b == null_val {
        return BOOLEAN_NULL;
    }
    let r = match op {
        0 => a == b,
        1 => a != b,
        2 => a < b,
        3 => a <= b,
        4 => a > b,
        5 => a >= b,
        _ => unreachable!("bad comparison op code"),
    };
    r as i64
}

/// SQL LIKE over raw bytes with `%`, `_` and an optional escape character.
///
/// # Safety
///
/// `s`/`pattern` must point at `s_len`/`pattern_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn string_like(
    s: *const u8,
    s_len: i32,
    pattern: *const u8,
    pattern_len: i32,
    escape: u8,
) -> i8 {
    let s = std::slice::from_raw_parts(s, s_len as usize);
    let p = std::slice::from_raw_parts(pattern, pattern_len as usize);
    like_match(s, p, escape, false) as i8
}

/// Case-insensitive LIKE; see [`string_like`].
///
/// # Safety
///
/// `s`/`pattern` must point at `s_len`/`pattern_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn string_ilike(
    s: *const u8,
    s_len: i32,
    pattern: *const u8,
    pattern_len: i32,
    escape: u8,
) -> i8 {
    let s = std::slice::from_raw_parts(s, s_len as usize);
    let p = std::slice::from_raw_parts(pattern, pattern_len as usize);
    like_match(s, p, escape, true) as i8
}

/// Three-way string comparison over raw bytes.
///
/// # Safety
///
/// `a`/`b` must point at `a_len`/`b_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn string_compare(a: *const u8, a_len: i32, b: *const u8, b_len: i32) -> i32 {
    let a = std::slice::from_raw_parts(a, a_len as usize);
    let b = std::slice::from_raw_parts(b, b_len as usize);
    match a.cmp(b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

/// The safe core of the LIKE helpers; also used directly by the in-process
/// engine.
pub fn like_match(s: &[u8], pattern: &[u8], escape: u8, case_insensitive: bool) -> bool {
    fn fold(b: u8, ci: bool) -> u8 {
        if ci {
            b.to_ascii_lowercase()
        } else {
            b
        }
    }

    fn inner(s: &[u8], p: &[u8], escape: u8, ci: bool) -> bool {
        if p.is_empty() {
            return s.is_empty();
        }
        match p[0] {
            b'%' => {
                // collapse over every split point
                (0..=s.len()).any(|i| inner(&s[i..], &p[1..], escape, ci))
            }
            b'_' => !s.is_empty() && inner(&s[1..], &p[1..], escape, ci),
            c if c == escape && escape != 0 && p.len() > 1 => {
                !s.is_empty()
                    && fold(s[0], ci) == fold(p[1], ci)
                    && inner(&s[1..], &p[2..], escape, ci)
            }
            c => !s.is_empty() && fold(s[0], ci) == fold(c, ci) && inner(&s[1..], &p[1..], escape, ci),
        }
    }

    inner(s, pattern, escape, case_insensitive)
}

/// Civil date from days since the Unix epoch (Gregorian, proleptic).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn split_epoch(ts: i64) -> (i64, i64) {
    // floor division towards negative infinity for pre-epoch timestamps
    let days = ts.div_euclid(86_400);
    let secs = ts.rem_euclid(86_400);
    (days, secs)
}

#[no_mangle]
pub extern "C" fn extract_year(ts: i64) -> i64 {
    let (days, _) = split_epoch(ts);
    civil_from_days(days).0
}

#[no_mangle]
pub extern "C" fn extract_month(ts: i64) -> i64 {
    let (days, _) = split_epoch(ts);
    civil_from_days(days).1 as i64
}

#[no_mangle]
pub extern "C" fn extract_day(ts: i64) -> i64 {
    let (days, _) = split_epoch(ts);
    civil_from_days(days).2 as i64
}

#[no_mangle]
pub extern "C" fn extract_hour(ts: i64) -> i64 {
    split_epoch(ts).1 / 3600
}

#[no_mangle]
pub extern "C" fn extract_minute(ts: i64) -> i64 {
    split_epoch(ts).1 % 3600 / 60
}

#[no_mangle]
pub extern "C" fn extract_second(ts: i64) -> i64 {
    split_epoch(ts).1 % 60
}

/// ISO day of week: 1 = Monday .. 7 = Sunday.
#[no_mangle]
pub extern "C" fn extract_day_of_week(ts: i64) -> i64 {
    let (days, _) = split_epoch(ts);
    // 1970-01-01 was a Thursday
    (days + 3).rem_euclid(7) + 1
}

#[no_mangle]
pub extern "C" fn extract_day_of_year(ts: i64) -> i64 {
    let (days, _) = split_epoch(ts);
    let (y, _, _) = civil_from_days(days);
    let jan1 = days_from_civil(y, 1, 1);
    days - jan1 + 1
}

#[no_mangle]
pub extern "C" fn extract_epoch(ts: i64) -> i64 {
    ts
}

/// Days since the Unix epoch for a civil date; inverse of
/// [`civil_from_days`].
fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = if m > 2 { m - 3 } else { m + 9 } as i64;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
