//! Line-oriented parsers that turn introspection text into an icon resource
//! path inside the archive. Both tolerate arbitrary noise and return `None`
//! when nothing usable is present.

use std::sync::OnceLock;

use regex::Regex;

const DENSITIES: &[(&str, u32)] = &[
    ("-xxxhdpi", 640),
    ("-xxhdpi", 480),
    ("-xhdpi", 320),
    ("-hdpi", 240),
    ("-mdpi", 160),
    ("-ldpi", 120),
    ("-anydpi", 0),
];

/// Approximate DPI of a resource path's density qualifier, 0 when absent.
pub fn density_dpi(path: &str) -> u32 {
    DENSITIES
        .iter()
        .find(|(qualifier, _)| path.contains(qualifier))
        .map_or(0, |(_, dpi)| *dpi)
}

/// `res/foo.xml` -> `res/foo.png`. Vector drawables usually ship a raster
/// sibling for older platforms.
pub fn raster_sibling(path: &str) -> Option<String> {
    path.strip_suffix(".xml").map(|stem| format!("{stem}.png"))
}

fn is_raster(path: &str) -> bool {
    path.ends_with(".png") || path.ends_with(".webp")
}

/// Best `icon=` assignment in a package resource dump: the highest-density
/// raster wins; a vector assignment is only used (as its raster sibling)
/// when no raster appears at all.
pub fn parse_dump_icon(dump: &str) -> Option<String> {
    let mut best_raster: Option<(u32, &str)> = None;
    let mut first_vector: Option<&str> = None;

    for line in dump.lines().map(str::trim) {
        let Some(assignment) = line.split("icon=").nth(1) else {
            continue;
        };
        let path = assignment.trim().split(' ').next().unwrap_or_default();

        if is_raster(path) {
            let dpi = density_dpi(path);
            if best_raster.map_or(true, |(best_dpi, _)| dpi > best_dpi) {
                best_raster = Some((dpi, path));
            }
        } else if path.ends_with(".xml") && first_vector.is_none() {
            first_vector = Some(path);
        }
    }

    match (best_raster, first_vector) {
        (Some((_, path)), _) => Some(path.to_owned()),
        (None, Some(vector)) => raster_sibling(vector),
        (None, None) => None,
    }
}

/// Icon declared in `aapt2 dump badging` output. The `application:` line is
/// authoritative; otherwise the highest `application-icon-<dpi>` raster is
/// used, with a vector sibling only as the first fallback seen.
pub fn parse_badging_icon(badging: &str) -> Option<String> {
    static APPLICATION_ICON_RE: OnceLock<Regex> = OnceLock::new();
    static DENSITY_ICON_RE: OnceLock<Regex> = OnceLock::new();
    let application_icon = APPLICATION_ICON_RE.get_or_init(|| {
        Regex::new(r"icon='([^']*)'").expect("application icon regex should compile")
    });
    let density_icon = DENSITY_ICON_RE.get_or_init(|| {
        Regex::new(r"^application-icon-(\d+):'?([^']*)'?")
            .expect("density icon regex should compile")
    });

    for line in badging.lines().filter(|line| line.starts_with("application:")) {
        let Some(captures) = application_icon.captures(line) else {
            continue;
        };
        let path = &captures[1];
        if let Some(raster) = raster_sibling(path) {
            return Some(raster);
        }
        if is_raster(path) {
            return Some(path.to_owned());
        }
    }

    let mut best: Option<(u32, String)> = None;
    for line in badging.lines() {
        let Some(captures) = density_icon.captures(line.trim_end()) else {
            continue;
        };
        let dpi = captures[1].parse::<u32>().unwrap_or(0);
        let path = &captures[2];

        if is_raster(path) {
            if best.as_ref().map_or(true, |(best_dpi, _)| dpi > *best_dpi) {
                best = Some((dpi, path.to_owned()));
            }
        } else if best.is_none() {
            if let Some(raster) = raster_sibling(path) {
                best = Some((dpi, raster));
            }
        }
    }
    best.map(|(_, path)| path)
}
