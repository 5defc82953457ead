//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Render a number the way a worksheet would: integers without a decimal point,
/// everything else with at most six decimals and no trailing zeros.
pub fn format_number(v: f64) -> String {
  if v.is_nan() {
    return "NaN".into();
  }
  let rounded = v.round();
  if (v - rounded).abs() < 1e-9 && rounded.abs() < 1e15 {
    // avoids "-0"
    return format!("{}", rounded as i64);
  }
  let s = format!("{:.6}", v);
  let s = s.trim_end_matches('0').trim_end_matches('.');
  if s == "-0" { "0".into() } else { s.to_string() }
}

/// Round to `places` decimals. Canonical answers are stored rounded so that
/// their textual form and their numeric value agree.
pub fn round_to(v: f64, places: u32) -> f64 {
  let f = 10f64.powi(places as i32);
  (v * f).round() / f
}

/// SplitMix64 step. Used to derive per-item seeds inside a batch so that
/// item `i` of a batch is reproducible on its own.
pub fn derive_seed(seed: u64, index: u64) -> u64 {
  let mut z = seed.wrapping_add(index.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
  z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
  z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
  z ^ (z >> 31)
}

/// Levenshtein distance over chars.
pub fn edit_distance(a: &str, b: &str) -> usize {
  let a: Vec<char> = a.chars().collect();
  let b: Vec<char> = b.chars().collect();
  let mut prev: Vec<usize> = (0..=b.len()).collect();
  let mut cur = vec![0; b.len() + 1];
  for i in 1..=a.len() {
    cur[0] = i;
    for j in 1..=b.len() {
      let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
      cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
    }
    std::mem::swap(&mut prev, &mut cur);
  }
  prev[b.len()]
}

/// Log-safe truncation for large strings.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    s.to_string()
  } else {
    let head: String = s.chars().take(max).collect();
    format!("{}… ({} bytes total)", head, s.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn numbers_render_compactly() {
    assert_eq!(format_number(4.0), "4");
    assert_eq!(format_number(-0.0), "0");
    assert_eq!(format_number(2.5), "2.5");
    assert_eq!(format_number(1.0 / 3.0), "0.333333");
    assert_eq!(format_number(-1e-12), "0");
  }

  #[test]
  fn derived_seeds_are_stable_and_distinct() {
    assert_eq!(derive_seed(42, 0), derive_seed(42, 0));
    assert_ne!(derive_seed(42, 0), derive_seed(42, 1));
    assert_ne!(derive_seed(42, 0), derive_seed(43, 0));
  }

  #[test]
  fn edit_distance_basics() {
    assert_eq!(edit_distance("paris", "paris"), 0);
    assert_eq!(edit_distance("paris", "pariss"), 1);
    assert_eq!(edit_distance("kitten", "sitting"), 3);
  }

  #[test]
  fn templates_fill() {
    assert_eq!(fill_template("{a} and {b}", &[("a", "x"), ("b", "y")]), "x and y");
  }
}
