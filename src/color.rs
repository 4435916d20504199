use crate::models::GroupColorEntry;
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, BTreeSet};

/// OKLAB distance below which two run colors are considered a clash.
pub const CLASH_DELTA_E: f64 = 0.04;
/// Angular step of the clash-resolution hue sweep, in degrees.
pub const HUE_SWEEP_STEP_DEGREES: f64 = 5.0;
/// Chroma shared by all hash-derived colors.
pub const HASH_CHROMA: f64 = 0.15;
/// Lightness on light backgrounds.
pub const LIGHTNESS_LIGHT: f64 = 0.7;
/// Lightness on dark backgrounds.
pub const LIGHTNESS_DARK: f64 = 0.65;
/// Placeholder for inactive or unmatched runs.
pub const INACTIVE_COLOR: &str = "#808080";

/// Legacy categorical palette used for group colors and as the fallback
/// when hash-derived coloring is disabled.
pub static DEFAULT_PALETTE: Lazy<Vec<String>> =
    Lazy::new(|| sample_colors(24, LIGHTNESS_LIGHT, HASH_CHROMA, 0.0));

/// 32-bit FNV-1a. Non-cryptographic; the point is reproducibility of
/// run colors across sessions without coordination.
pub fn fnv1a32(key: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// Maps a 32-bit hash linearly onto the hue wheel.
pub fn hash_to_hue(hash: u32) -> f64 {
    f64::from(hash) / 4294967296.0 * 360.0
}

/// Deterministic hash-derived color: fixed chroma, theme-dependent
/// lightness, hue from the hash.
pub fn hash_color_to_hex(hash: u32, dark_mode: bool) -> String {
    oklch_to_hex(theme_lightness(dark_mode), HASH_CHROMA, hash_to_hue(hash))
}

pub fn theme_lightness(dark_mode: bool) -> f64 {
    if dark_mode {
        LIGHTNESS_DARK
    } else {
        LIGHTNESS_LIGHT
    }
}

// ─── OKLCH color space ──────────────────────────────────────────────────────
//
// OKLCH is perceptually uniform: equal steps correspond to equal perceived
// differences, unlike naive HSL. Conversion chain:
// OKLCH → OKLAB → linear sRGB → sRGB → hex, with the reference matrices.

fn oklch_to_oklab(l: f64, c: f64, h: f64) -> (f64, f64, f64) {
    let h_rad = h.to_radians();
    (l, c * h_rad.cos(), c * h_rad.sin())
}

fn oklab_to_linear_srgb(l: f64, a: f64, b: f64) -> (f64, f64, f64) {
    let l_ = l + 0.3963377774 * a + 0.2158037573 * b;
    let m_ = l - 0.1055613458 * a - 0.0638541728 * b;
    let s_ = l - 0.0894841775 * a - 1.2914855480 * b;

    let l3 = l_ * l_ * l_;
    let m3 = m_ * m_ * m_;
    let s3 = s_ * s_ * s_;

    (
        4.0767416621 * l3 - 3.3077115913 * m3 + 0.2309699292 * s3,
        -1.2684380046 * l3 + 2.6097574011 * m3 - 0.3413193965 * s3,
        -0.0041960863 * l3 - 0.7034186147 * m3 + 1.7076147010 * s3,
    )
}

fn linear_to_srgb(x: f64) -> f64 {
    if x <= 0.0031308 {
        12.92 * x
    } else {
        1.055 * x.powf(1.0 / 2.4) - 0.055
    }
}

fn srgb_to_linear(x: f64) -> f64 {
    if x <= 0.04045 {
        x / 12.92
    } else {
        ((x + 0.055) / 1.055).powf(2.4)
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

fn signed_cbrt(x: f64) -> f64 {
    x.cbrt()
}

pub fn oklch_to_hex(l: f64, c: f64, h: f64) -> String {
    let (ll, a, b) = oklch_to_oklab(l, c, h);
    let (lr, lg, lb) = oklab_to_linear_srgb(ll, a, b);
    let r = (clamp01(linear_to_srgb(lr)) * 255.0).round() as u8;
    let g = (clamp01(linear_to_srgb(lg)) * 255.0).round() as u8;
    let bb = (clamp01(linear_to_srgb(lb)) * 255.0).round() as u8;
    format!("#{r:02x}{g:02x}{bb:02x}")
}

pub fn hex_to_rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some((r, g, b))
}

pub fn hex_to_oklab(hex: &str) -> Option<(f64, f64, f64)> {
    let (r, g, b) = hex_to_rgb(hex)?;
    let r_lin = srgb_to_linear(f64::from(r) / 255.0);
    let g_lin = srgb_to_linear(f64::from(g) / 255.0);
    let b_lin = srgb_to_linear(f64::from(b) / 255.0);

    let l = 0.4122214708 * r_lin + 0.5363325363 * g_lin + 0.0514459929 * b_lin;
    let m = 0.2119034982 * r_lin + 0.6806995451 * g_lin + 0.1073969566 * b_lin;
    let s = 0.0883024619 * r_lin + 0.2817188376 * g_lin + 0.6299787005 * b_lin;

    let l_ = signed_cbrt(l);
    let m_ = signed_cbrt(m);
    let s_ = signed_cbrt(s);

    Some((
        0.2104542553 * l_ + 0.7936177850 * m_ - 0.0040720468 * s_,
        1.9779984951 * l_ - 2.4285922050 * m_ + 0.4505937099 * s_,
        0.0259040371 * l_ + 0.7827717662 * m_ - 0.8086757660 * s_,
    ))
}

pub fn hex_to_oklch(hex: &str) -> Option<(f64, f64, f64)> {
    let (l, a, b) = hex_to_oklab(hex)?;
    let c = (a * a + b * b).sqrt();
    let h = b.atan2(a).to_degrees().rem_euclid(360.0);
    Some((l, c, h))
}

/// Perceptual distance between two hex colors in OKLAB. Unparseable input
/// reads as maximally distant so it never registers as a clash.
pub fn oklab_delta_e(hex_a: &str, hex_b: &str) -> f64 {
    match (hex_to_oklab(hex_a), hex_to_oklab(hex_b)) {
        (Some((l1, a1, b1)), Some((l2, a2, b2))) => {
            let dl = l1 - l2;
            let da = a1 - a2;
            let db = b1 - b2;
            (dl * dl + da * da + db * db).sqrt()
        }
        _ => f64::MAX,
    }
}

/// Generates n evenly-spaced perceptually uniform colors around the hue
/// wheel at fixed lightness and chroma.
pub fn sample_colors(n: usize, lightness: f64, chroma: f64, hue_start: f64) -> Vec<String> {
    (0..n)
        .map(|i| {
            let hue = (hue_start + i as f64 * 360.0 / n as f64).rem_euclid(360.0);
            oklch_to_hex(lightness, chroma, hue)
        })
        .collect()
}

/// Lightness band for the varied sampler.
pub const VARIED_LIGHTNESS_RANGE: (f64, f64) = (0.55, 0.8);
/// Chroma band for the varied sampler.
pub const VARIED_CHROMA_RANGE: (f64, f64) = (0.12, 0.18);
/// Palette sizes above this switch to varied sampling.
pub const VARIED_THRESHOLD: usize = 8;

/// Generates n colors varying lightness and chroma in addition to hue.
///
/// Past roughly eight colors hue alone stops being distinguishable, so the
/// secondary dimensions zigzag through the given bands: even indices walk
/// lightness down while chroma rises, odd indices do the opposite half of
/// each band.
pub fn sample_colors_varied(
    n: usize,
    lightness_range: (f64, f64),
    chroma_range: (f64, f64),
) -> Vec<String> {
    let (l_min, l_max) = lightness_range;
    let (c_min, c_max) = chroma_range;
    (0..n)
        .map(|i| {
            let hue = (i as f64 * 360.0 / n as f64).rem_euclid(360.0);
            let t = i as f64 / (n - 1).max(1) as f64;
            let (lightness, chroma) = if i % 2 == 0 {
                (
                    l_min + (l_max - l_min) * (1.0 - t * 0.5),
                    c_min + (c_max - c_min) * t,
                )
            } else {
                (
                    l_min + (l_max - l_min) * (0.5 + t * 0.5),
                    c_max - (c_max - c_min) * t * 0.5,
                )
            };
            oklch_to_hex(lightness, chroma, hue)
        })
        .collect()
}

/// Builds a complete run→hex assignment for a list of run ids, in order.
/// Large lists (or `varied = true`) use the varied sampler.
pub fn colors_for_runs(
    run_ids: &[String],
    lightness: f64,
    chroma: f64,
    varied: bool,
) -> BTreeMap<String, String> {
    let n = run_ids.len();
    let colors = if varied || n > VARIED_THRESHOLD {
        sample_colors_varied(n, VARIED_LIGHTNESS_RANGE, VARIED_CHROMA_RANGE)
    } else {
        sample_colors(n, lightness, chroma, 0.0)
    };
    run_ids
        .iter()
        .cloned()
        .zip(colors)
        .collect()
}

/// Raises OKLCH lightness; returns the input unchanged if it isn't a hex
/// color.
pub fn lighten(hex: &str, amount: f64) -> String {
    match hex_to_oklch(hex) {
        Some((l, c, h)) => oklch_to_hex((l + amount).min(1.0), c, h),
        None => hex.to_string(),
    }
}

/// Lowers OKLCH lightness; returns the input unchanged if it isn't a hex
/// color.
pub fn darken(hex: &str, amount: f64) -> String {
    match hex_to_oklch(hex) {
        Some((l, c, h)) => oklch_to_hex((l - amount).max(0.0), c, h),
        None => hex.to_string(),
    }
}

// ─── Group color assignment ─────────────────────────────────────────────────

fn rgb_distance_sq(hex_a: &str, hex_b: &str) -> i64 {
    match (hex_to_rgb(hex_a), hex_to_rgb(hex_b)) {
        (Some((r1, g1, b1)), Some((r2, g2, b2))) => {
            let dr = i64::from(r1) - i64::from(r2);
            let dg = i64::from(g1) - i64::from(g2);
            let db = i64::from(b1) - i64::from(b2);
            dr * dr + dg * dg + db * db
        }
        _ => 0,
    }
}

fn scope_of(group_key: &str) -> &str {
    group_key.split('|').next().unwrap_or(group_key)
}

/// Assigns palette ids to group keys, keeping `existing` assignments
/// untouched.
///
/// Each new key prefers `fnv1a32(key) % palette.len()`. When that id is
/// already used within the key's scope, the unused id whose color is
/// farthest (max-min squared RGB distance) from every used color in the
/// scope wins; ties break on a secondary hash of `"<key>#<id>"`, then on
/// the smaller id. This is a greedy placement, not a global optimization.
/// With every id in use the preferred id is reused (palette exhausted).
pub fn assign_group_colors(
    existing: &[GroupColorEntry],
    group_keys: &[String],
    palette: &[String],
) -> Vec<GroupColorEntry> {
    if palette.is_empty() {
        return Vec::new();
    }

    let mut assigned: BTreeMap<String, i64> = existing
        .iter()
        .map(|entry| (entry.group_key.clone(), entry.color_id))
        .collect();
    let mut used_by_scope: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
    for entry in existing {
        used_by_scope
            .entry(scope_of(&entry.group_key).to_string())
            .or_default()
            .insert(entry.color_id);
    }

    let mut result = Vec::new();
    for key in group_keys {
        if assigned.contains_key(key) {
            continue;
        }
        let scope = scope_of(key).to_string();
        let used = used_by_scope.entry(scope).or_default();
        let preferred = i64::from(fnv1a32(key) % palette.len() as u32);

        let id = if !used.contains(&preferred) {
            preferred
        } else {
            let unused: Vec<i64> = (0..palette.len() as i64)
                .filter(|id| !used.contains(id))
                .collect();
            if unused.is_empty() {
                preferred
            } else {
                pick_most_distant(&unused, used, key, palette)
            }
        };

        used.insert(id);
        assigned.insert(key.clone(), id);
        result.push(GroupColorEntry {
            group_key: key.clone(),
            color_id: id,
        });
    }
    result
}

fn pick_most_distant(
    unused: &[i64],
    used: &BTreeSet<i64>,
    key: &str,
    palette: &[String],
) -> i64 {
    let mut best_id = unused[0];
    let mut best_dist = i64::MIN;
    let mut best_tie = u32::MAX;
    for &candidate in unused {
        let dist = used
            .iter()
            .map(|&u| rgb_distance_sq(&palette[candidate as usize], &palette[u as usize]))
            .min()
            .unwrap_or(i64::MAX);
        let tie = fnv1a32(&format!("{key}#{candidate}"));
        let better = dist > best_dist
            || (dist == best_dist && tie < best_tie)
            || (dist == best_dist && tie == best_tie && candidate < best_id);
        if better {
            best_id = candidate;
            best_dist = dist;
            best_tie = tie;
        }
    }
    best_id
}

// ─── Clash detection and resolution ─────────────────────────────────────────

fn hue_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % 360.0;
    d.min(360.0 - d)
}

/// Post-hoc repair pass over the currently active run colors.
///
/// Runs are scanned pairwise in run-id order; for each pair closer than
/// `CLASH_DELTA_E` in OKLAB the second run is re-colored by sweeping hues
/// in `HUE_SWEEP_STEP_DEGREES` steps and keeping the hue whose minimum
/// angular distance to every other active hue is largest. Reassignments
/// feed back into the scan, so one pass can chain. Runs in `locked`
/// (explicit user or profile overrides) are never re-colored; when the
/// second run of a pair is locked and the first is not, the first moves
/// instead.
///
/// Returns the changed run→hex assignments; the caller persists them as
/// overrides so the repair survives reloads.
pub fn resolve_clashes(
    active: &[(String, String)],
    locked: &BTreeSet<String>,
    dark_mode: bool,
) -> BTreeMap<String, String> {
    let mut order: Vec<String> = active.iter().map(|(run, _)| run.clone()).collect();
    order.sort();
    order.dedup();

    let mut current: BTreeMap<String, String> = active.iter().cloned().collect();
    let mut changed: BTreeMap<String, String> = BTreeMap::new();

    for i in 0..order.len() {
        for j in (i + 1)..order.len() {
            let first = &order[i];
            let second = &order[j];
            let (Some(color_a), Some(color_b)) = (current.get(first), current.get(second)) else {
                continue;
            };
            if oklab_delta_e(color_a, color_b) >= CLASH_DELTA_E {
                continue;
            }
            let target = if !locked.contains(second) {
                second
            } else if !locked.contains(first) {
                first
            } else {
                continue;
            };

            let other_hues: Vec<f64> = current
                .iter()
                .filter(|(run, _)| run.as_str() != target)
                .filter_map(|(_, hex)| hex_to_oklch(hex).map(|(_, _, h)| h))
                .collect();
            let hue = best_separated_hue(&other_hues);
            let replacement = oklch_to_hex(theme_lightness(dark_mode), HASH_CHROMA, hue);
            current.insert(target.clone(), replacement.clone());
            changed.insert(target.clone(), replacement);
        }
    }
    changed
}

/// Sweeps the hue wheel at fixed steps and returns the candidate whose
/// minimum distance to all `other_hues` is maximal. Ties break on the
/// smaller hue. With a crowded wheel the best-found hue is returned even
/// if it stays under the clash threshold.
fn best_separated_hue(other_hues: &[f64]) -> f64 {
    let mut best_hue = 0.0;
    let mut best_min = f64::MIN;
    let mut hue = 0.0;
    while hue < 360.0 {
        let min_dist = other_hues
            .iter()
            .map(|&other| hue_distance(hue, other))
            .fold(f64::MAX, f64::min);
        if min_dist > best_min {
            best_min = min_dist;
            best_hue = hue;
        }
        hue += HUE_SWEEP_STEP_DEGREES;
    }
    best_hue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a32_matches_reference_vectors() {
        // Published FNV-1a test vectors.
        assert_eq!(fnv1a32(""), 0x811c9dc5);
        assert_eq!(fnv1a32("a"), 0xe40c292c);
        assert_eq!(fnv1a32("foobar"), 0xbf9cf968);
    }

    #[test]
    fn hash_color_is_deterministic() {
        let first = hash_color_to_hex(fnv1a32("run_a"), false);
        let second = hash_color_to_hex(fnv1a32("run_a"), false);
        assert_eq!(first, second);
        assert_ne!(first, hash_color_to_hex(fnv1a32("run_b"), false));
        assert_ne!(first, hash_color_to_hex(fnv1a32("run_a"), true));
    }

    #[test]
    fn oklch_hex_output_is_well_formed() {
        for hue in [0.0, 45.0, 123.4, 359.9] {
            let hex = oklch_to_hex(0.7, 0.15, hue);
            assert_eq!(hex.len(), 7);
            assert!(hex.starts_with('#'));
            assert!(hex[1..].chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn hex_oklch_round_trip_is_faithful() {
        for hex in ["#dc8a78", "#2196f3", "#4caf50", "#808080"] {
            let (l, c, h) = hex_to_oklch(hex).expect("parse hex");
            let back = oklch_to_hex(l, c, h);
            // Allow a one-step quantization error per channel.
            let (r1, g1, b1) = hex_to_rgb(hex).expect("rgb in");
            let (r2, g2, b2) = hex_to_rgb(&back).expect("rgb out");
            assert!(i16::from(r1).abs_diff(i16::from(r2)) <= 1, "{hex} -> {back}");
            assert!(i16::from(g1).abs_diff(i16::from(g2)) <= 1, "{hex} -> {back}");
            assert!(i16::from(b1).abs_diff(i16::from(b2)) <= 1, "{hex} -> {back}");
        }
    }

    #[test]
    fn sample_colors_are_unique_and_valid() {
        let colors = sample_colors(10, 0.7, 0.15, 0.0);
        assert_eq!(colors.len(), 10);
        let unique: std::collections::BTreeSet<&String> = colors.iter().collect();
        assert_eq!(unique.len(), 10);
        assert!(sample_colors(0, 0.7, 0.15, 0.0).is_empty());
    }

    #[test]
    fn varied_colors_are_unique_and_vary_lightness() {
        let colors = sample_colors_varied(12, VARIED_LIGHTNESS_RANGE, VARIED_CHROMA_RANGE);
        assert_eq!(colors.len(), 12);
        let unique: std::collections::BTreeSet<&String> = colors.iter().collect();
        assert_eq!(unique.len(), 12);
        for hex in &colors {
            assert_eq!(hex.len(), 7);
            assert!(hex.starts_with('#'));
        }
        assert!(sample_colors_varied(0, VARIED_LIGHTNESS_RANGE, VARIED_CHROMA_RANGE).is_empty());

        // Adjacent entries sit in different halves of the lightness band.
        let (l0, _, _) = hex_to_oklch(&colors[0]).expect("first");
        let (l1, _, _) = hex_to_oklch(&colors[1]).expect("second");
        assert!((l0 - l1).abs() > 0.02, "lightness barely varies: {l0} vs {l1}");
    }

    #[test]
    fn colors_for_runs_switches_to_varied_past_the_threshold() {
        let few: Vec<String> = (0..3).map(|i| format!("run{i}")).collect();
        let assigned = colors_for_runs(&few, LIGHTNESS_LIGHT, HASH_CHROMA, false);
        let uniform = sample_colors(3, LIGHTNESS_LIGHT, HASH_CHROMA, 0.0);
        assert_eq!(assigned["run0"], uniform[0]);
        assert_eq!(assigned["run2"], uniform[2]);

        let many: Vec<String> = (0..9).map(|i| format!("run{i}")).collect();
        let assigned = colors_for_runs(&many, LIGHTNESS_LIGHT, HASH_CHROMA, false);
        let varied = sample_colors_varied(9, VARIED_LIGHTNESS_RANGE, VARIED_CHROMA_RANGE);
        assert_eq!(assigned.len(), 9);
        assert_eq!(assigned["run0"], varied[0]);
        assert_eq!(assigned["run8"], varied[8]);

        // Explicit opt-in uses the varied sampler below the threshold too.
        let forced = colors_for_runs(&few, LIGHTNESS_LIGHT, HASH_CHROMA, true);
        let varied_few = sample_colors_varied(3, VARIED_LIGHTNESS_RANGE, VARIED_CHROMA_RANGE);
        assert_eq!(forced["run1"], varied_few[1]);
    }

    #[test]
    fn lighten_and_darken_move_lightness() {
        let base = "#808080";
        let (l_base, _, _) = hex_to_oklch(base).expect("base");
        let (l_light, _, _) = hex_to_oklch(&lighten(base, 0.2)).expect("light");
        let (l_dark, _, _) = hex_to_oklch(&darken(base, 0.2)).expect("dark");
        assert!(l_light > l_base);
        assert!(l_dark < l_base);
        assert_eq!(lighten("not-a-color", 0.2), "not-a-color");
    }

    #[test]
    fn delta_e_is_zero_for_identical_colors() {
        assert_eq!(oklab_delta_e("#dc8a78", "#dc8a78"), 0.0);
        assert!(oklab_delta_e("#000000", "#ffffff") > 0.5);
    }

    #[test]
    fn group_assignment_prefers_hash_slot() {
        let palette = sample_colors(8, 0.7, 0.15, 0.0);
        let keys = vec!["EXPERIMENT|exp1".to_string()];
        let entries = assign_group_colors(&[], &keys, &palette);
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].color_id,
            i64::from(fnv1a32("EXPERIMENT|exp1") % 8)
        );
    }

    #[test]
    fn group_assignment_avoids_used_ids_within_scope() {
        let palette = sample_colors(8, 0.7, 0.15, 0.0);
        let keys: Vec<String> = (0..8).map(|i| format!("EXPERIMENT|exp{i}")).collect();
        let entries = assign_group_colors(&[], &keys, &palette);
        let ids: std::collections::BTreeSet<i64> =
            entries.iter().map(|e| e.color_id).collect();
        assert_eq!(ids.len(), 8, "all ids distinct until the palette is full");
    }

    #[test]
    fn group_assignment_is_scoped_and_stable() {
        let palette = sample_colors(8, 0.7, 0.15, 0.0);
        let existing = assign_group_colors(
            &[],
            &["EXPERIMENT|exp1".to_string(), "EXPERIMENT|exp2".to_string()],
            &palette,
        );

        // Same group ids under a different scope get their preferred slots
        // independently of the EXPERIMENT scope.
        let other_scope = assign_group_colors(
            &existing,
            &["RUN|exp1".to_string()],
            &palette,
        );
        assert_eq!(
            other_scope[0].color_id,
            i64::from(fnv1a32("RUN|exp1") % 8)
        );

        // Existing assignments are not reassigned.
        let again = assign_group_colors(&existing, &["EXPERIMENT|exp1".to_string()], &palette);
        assert!(again.is_empty());
    }

    #[test]
    fn group_assignment_wraps_when_palette_is_exhausted() {
        let palette = sample_colors(2, 0.7, 0.15, 0.0);
        let keys: Vec<String> = (0..3).map(|i| format!("RUN|r{i}")).collect();
        let entries = assign_group_colors(&[], &keys, &palette);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].color_id, i64::from(fnv1a32("RUN|r2") % 2));
    }

    #[test]
    fn clash_resolution_separates_identical_colors() {
        let shared = hash_color_to_hex(fnv1a32("run_a"), false);
        let active = vec![
            ("run_a".to_string(), shared.clone()),
            ("run_b".to_string(), shared.clone()),
        ];
        let changed = resolve_clashes(&active, &BTreeSet::new(), false);
        // Second run in sorted order moves.
        assert_eq!(changed.len(), 1);
        let new_color = changed.get("run_b").expect("run_b reassigned");
        assert!(oklab_delta_e(&shared, new_color) >= CLASH_DELTA_E);
    }

    #[test]
    fn clash_resolution_never_touches_locked_runs() {
        let shared = oklch_to_hex(0.7, 0.15, 120.0);
        let active = vec![
            ("run_a".to_string(), shared.clone()),
            ("run_b".to_string(), shared.clone()),
        ];
        let locked: BTreeSet<String> = ["run_b".to_string()].into();
        let changed = resolve_clashes(&active, &locked, false);
        assert!(!changed.contains_key("run_b"));
        assert!(changed.contains_key("run_a"));

        let both: BTreeSet<String> = ["run_a".to_string(), "run_b".to_string()].into();
        assert!(resolve_clashes(&active, &both, false).is_empty());
    }

    #[test]
    fn clash_resolution_chains_transitively() {
        let shared = oklch_to_hex(0.7, 0.15, 200.0);
        let active = vec![
            ("r1".to_string(), shared.clone()),
            ("r2".to_string(), shared.clone()),
            ("r3".to_string(), shared.clone()),
        ];
        let changed = resolve_clashes(&active, &BTreeSet::new(), false);
        let mut final_colors: Vec<String> = active
            .iter()
            .map(|(run, hex)| changed.get(run).cloned().unwrap_or_else(|| hex.clone()))
            .collect();
        final_colors.sort();
        for i in 0..final_colors.len() {
            for j in (i + 1)..final_colors.len() {
                assert!(
                    oklab_delta_e(&final_colors[i], &final_colors[j]) >= CLASH_DELTA_E,
                    "pair {i}/{j} still clashes"
                );
            }
        }
    }

    #[test]
    fn crowded_wheel_returns_best_found_hue() {
        // Known limit: with every sweep slot occupied no candidate hue can
        // clear the threshold, so the repair keeps the best-found hue
        // instead of guaranteeing separation.
        let mut active: Vec<(String, String)> = (0..72)
            .map(|i| {
                (
                    format!("run_{i:02}"),
                    oklch_to_hex(0.7, 0.15, f64::from(i) * 5.0),
                )
            })
            .collect();
        active.push(("run_99".to_string(), oklch_to_hex(0.7, 0.15, 0.0)));

        let changed = resolve_clashes(&active, &BTreeSet::new(), false);
        // The pass still terminates and reassigns deterministically.
        let again = resolve_clashes(&active, &BTreeSet::new(), false);
        assert_eq!(changed, again);
    }
}
