// pixpack/src/utils/mod.rs
use crate::core::OUTPUT_EXTENSION;

/// Archive entry name for an upload: its base name with the final extension
/// swapped for `.webp` (or appended when there is none).
pub fn output_name(original_name: &str) -> String {
    let base = base_name(original_name);
    let stem = match base.rfind('.') {
        Some(idx) if idx > 0 => &base[..idx],
        _ => base,
    };

    format!("{}.{}", sanitize_filename(stem), OUTPUT_EXTENSION)
}

/// Returns `candidate`, or the first `stem-N.ext` for which `taken` is false.
pub fn dedupe_name<F>(candidate: &str, taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    if !taken(candidate) {
        return candidate.to_string();
    }

    let (stem, extension) = match candidate.rfind('.') {
        Some(idx) if idx > 0 => (&candidate[..idx], &candidate[idx..]),
        _ => (candidate, ""),
    };

    let mut counter = 1;
    loop {
        let name = format!("{}-{}{}", stem, counter, extension);
        if !taken(&name) {
            return name;
        }
        counter += 1;
    }
}

fn base_name(name: &str) -> &str {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "." || base == ".." {
        "image"
    } else {
        base
    }
}

pub fn sanitize_filename(filename: &str) -> String {
    let invalid_chars = [':', '*', '?', '"', '<', '>', '|'];
    filename
        .chars()
        .map(|c| {
            if invalid_chars.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let base = 1024_f64;
    let bytes_f64 = bytes as f64;
    let exponent = ((bytes_f64.log10() / base.log10()).floor() as usize).min(UNITS.len() - 1);
    let size = bytes_f64 / base.powi(exponent as i32);

    format!("{:.2} {}", size, UNITS[exponent])
}
