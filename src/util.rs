//! Small utility helpers used across modules.

/// Tolerance used when comparing point values that came through JSON.
pub const POINT_EPSILON: f64 = 1e-6;

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

pub fn approx_eq(a: f64, b: f64) -> bool {
  (a - b).abs() <= POINT_EPSILON
}

/// Round to `places` decimals, halves away from zero.
pub fn round_to(value: f64, places: i32) -> f64 {
  let factor = 10f64.powi(places);
  (value * factor).round() / factor
}

/// Arithmetic mean; `None` for an empty input.
pub fn mean<I: IntoIterator<Item = f64>>(values: I) -> Option<f64> {
  let (sum, count) = values.into_iter().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
  if count == 0 { None } else { Some(sum / count as f64) }
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
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
  fn fill_template_replaces_all_keys() {
    let out = fill_template("{title} worth {max_points} ({title})", &[("title", "Essay"), ("max_points", "100")]);
    assert_eq!(out, "Essay worth 100 (Essay)");
  }

  #[test]
  fn mean_of_empty_is_none() {
    assert_eq!(mean(Vec::<f64>::new()), None);
    assert_eq!(mean(vec![10.0, 20.0, 60.0]), Some(30.0));
  }

  #[test]
  fn round_to_two_places() {
    assert_eq!(round_to(44.999, 2), 45.0);
    assert_eq!(round_to(12.345, 1), 12.3);
  }

  #[test]
  fn trunc_respects_char_boundaries() {
    let s = "αβγδε";
    assert!(trunc_for_log(s, 2).starts_with("αβ…"));
    assert_eq!(trunc_for_log(s, 10), s);
  }
}
