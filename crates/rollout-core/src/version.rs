use semver::Version;

/// Parse a version string the way release artifacts actually spell them:
/// optional `v` prefix, one to four numeric segments, tolerated trailing
/// text after the numeric core. Normalized to major.minor.patch.
pub fn parse_version(input: &str) -> Option<Version> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }

    let mut segments = [0_u64; 3];
    let mut parts = trimmed.split('.');

    let major = leading_digits(parts.next()?);
    if major.is_empty() {
        return None;
    }
    segments[0] = major.parse().ok()?;

    for slot in segments.iter_mut().skip(1) {
        let Some(part) = parts.next() else {
            break;
        };
        let digits = leading_digits(part);
        if digits.is_empty() {
            break;
        }
        *slot = digits.parse().ok()?;
    }

    Some(Version::new(segments[0], segments[1], segments[2]))
}

fn leading_digits(part: &str) -> &str {
    let end = part
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map(|(index, _)| index)
        .unwrap_or(part.len());
    &part[..end]
}
