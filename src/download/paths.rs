use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::state::PhotoRecord;

/// Characters replaced with `_` in resolved names.
const UNSAFE_CHARS: &[char] = &[':', '?', '*', '"', '\'', '<', '>', '|'];

/// Resolved local name for a photo, before collision numbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    /// Directory the file lives in (`root / subdirectory`).
    pub dir: PathBuf,
    /// Filename without extension.
    pub stem: String,
    /// Extension including the leading dot, or empty.
    pub ext: String,
}

impl ResolvedName {
    /// Path of the `n`th candidate: `stem.ext` for 1, `stem-n.ext` after.
    pub fn candidate(&self, n: u32) -> PathBuf {
        if n <= 1 {
            self.dir.join(format!("{}{}", self.stem, self.ext))
        } else {
            self.dir.join(format!("{}-{}{}", self.stem, n, self.ext))
        }
    }
}

/// Where and how photos are named for one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub subdir_rule: String,
    pub naming_rule: String,
}

impl Layout {
    pub fn resolve(&self, record: &PhotoRecord) -> ResolvedName {
        resolve_name(&self.root, &self.subdir_rule, &self.naming_rule, record)
    }
}

/// Resolve the local name of a photo from the two templates.
///
/// `root / expand(subdir_rule) / expand(naming_rule) + url extension`. Both
/// templates are expanded, sanitized and split on either separator style, so
/// a camera model such as `"A/B"` becomes two directory levels under the
/// intended parent instead of escaping it.
pub fn resolve_name(
    root: &Path,
    subdir_rule: &str,
    naming_rule: &str,
    record: &PhotoRecord,
) -> ResolvedName {
    let subdir = sanitize(&expand_template(
        subdir_rule,
        &record.date_taken,
        &record.model,
        record.photo_id,
    ));
    let name = sanitize(&expand_template(
        naming_rule,
        &record.date_taken,
        &record.model,
        record.photo_id,
    ));

    let mut components: Vec<&str> = split_components(&subdir);
    components.extend(split_components(&name));

    let stem = match components.pop() {
        Some(last) => last.to_string(),
        None => record.photo_id.to_string(),
    };

    let mut dir = root.to_path_buf();
    for component in components {
        dir.push(component);
    }

    ResolvedName {
        dir,
        stem,
        ext: url_extension(&record.url).to_string(),
    }
}

/// Substitute `YYYY MM DD hh mm ss camera photo_id` in a template.
///
/// Plain find/replace in that order, each token once over the whole string.
/// Dates are zero-padded.
pub fn expand_template(
    template: &str,
    taken: &NaiveDateTime,
    model: &str,
    photo_id: u64,
) -> String {
    template
        .replace("YYYY", &format!("{:04}", taken.year()))
        .replace("MM", &format!("{:02}", taken.month()))
        .replace("DD", &format!("{:02}", taken.day()))
        .replace("hh", &format!("{:02}", taken.hour()))
        .replace("mm", &format!("{:02}", taken.minute()))
        .replace("ss", &format!("{:02}", taken.second()))
        .replace("camera", model)
        .replace("photo_id", &photo_id.to_string())
}

/// Replace characters that are invalid in filenames with `_`.
///
/// A leading drive prefix (`C:\` or `C:/`) keeps its colon.
pub fn sanitize(s: &str) -> String {
    let (prefix, rest) = split_drive_prefix(s);
    let mut out = String::with_capacity(s.len());
    out.push_str(prefix);
    out.extend(
        rest.chars()
            .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c }),
    );
    out
}

fn split_drive_prefix(s: &str) -> (&str, &str) {
    let bytes = s.as_bytes();
    if bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && matches!(bytes[2], b'\\' | b'/')
    {
        s.split_at(2)
    } else {
        ("", s)
    }
}

/// Split on `/` and `\`, dropping empty, `.` and `..` components.
fn split_components(s: &str) -> Vec<&str> {
    s.split(['/', '\\'])
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
        .collect()
}

/// The extension of the last URL path segment, including the dot.
///
/// Query strings and fragments are ignored; a segment without a dot yields
/// an empty extension.
pub fn url_extension(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or("");
    let segment = path.rsplit('/').next().unwrap_or("");
    match segment.rfind('.') {
        Some(0) | None => "",
        Some(dot) => &segment[dot..],
    }
}

/// Prefix a subdirectory rule with a sanitized album title.
pub fn album_subdir_rule(title: &str, subdir_rule: &str) -> String {
    let title = sanitize(title).replace(['/', '\\'], "_");
    if subdir_rule.is_empty() {
        title
    } else {
        format!("{}/{}", title, subdir_rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_record;
    use chrono::NaiveDate;

    fn taken() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 3, 2)
            .unwrap()
            .and_hms_opt(11, 22, 59)
            .unwrap()
    }

    #[test]
    fn test_default_template() {
        assert_eq!(
            expand_template("YYYY-MM-DD_hhmmss(camera)", &taken(), "iPhone 6", 1),
            "2016-03-02_112259(iPhone 6)"
        );
    }

    #[test]
    fn test_zero_padding_and_photo_id() {
        let t = NaiveDate::from_ymd_opt(987, 1, 5)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(
            expand_template("YYYYMMDD-hh.mm.ss-photo_id", &t, "x", 3348561253),
            "09870105-03.04.05-3348561253"
        );
    }

    #[test]
    fn test_template_without_tokens_untouched() {
        assert_eq!(expand_template("holiday", &taken(), "x", 1), "holiday");
    }

    #[test]
    fn test_sanitize_replaces_unsafe_chars() {
        assert_eq!(sanitize(r#"a:b?c*d"e'f<g>h|i"#), "a_b_c_d_e_f_g_h_i");
    }

    #[test]
    fn test_sanitize_keeps_drive_prefix() {
        assert_eq!(sanitize(r"C:\photos\a:b"), r"C:\photos\a_b");
        assert_eq!(sanitize("C:/photos"), "C:/photos");
        assert_eq!(sanitize("CC:/photos"), "CC_/photos");
    }

    #[test]
    fn test_url_extension() {
        assert_eq!(url_extension("https://live.staticflickr.com/1/2_abc_o.jpg"), ".jpg");
        assert_eq!(url_extension("https://x/a.b/photo.PNG?x=1.2"), ".PNG");
        assert_eq!(url_extension("https://x/a.b/photo"), "");
        assert_eq!(url_extension("https://x/.hidden"), "");
    }

    #[test]
    fn test_resolve_name_layout() {
        let mut record = sample_record(7);
        record.date_taken = taken();
        record.model = "iPhone 6".into();
        record.url = "https://x/7_o.jpg".into();

        let name = resolve_name(
            Path::new("root"),
            "YYYY/YYYYMM",
            "YYYY-MM-DD_hhmmss(camera)",
            &record,
        );
        assert_eq!(name.dir, Path::new("root").join("2016").join("201603"));
        assert_eq!(name.stem, "2016-03-02_112259(iPhone 6)");
        assert_eq!(name.ext, ".jpg");
        assert_eq!(
            name.candidate(1),
            name.dir.join("2016-03-02_112259(iPhone 6).jpg")
        );
        assert_eq!(
            name.candidate(3),
            name.dir.join("2016-03-02_112259(iPhone 6)-3.jpg")
        );
    }

    #[test]
    fn test_resolve_name_backslash_in_camera_stays_under_root() {
        let mut record = sample_record(7);
        record.model = r"..\..\evil/cam".into();
        let name = resolve_name(Path::new("root"), "", "camera", &record);
        assert_eq!(name.dir, Path::new("root").join("evil"));
        assert_eq!(name.stem, "cam");
    }

    #[test]
    fn test_resolve_name_empty_rule_falls_back_to_id() {
        let record = sample_record(42);
        let name = resolve_name(Path::new("root"), "", "", &record);
        assert_eq!(name.stem, "42");
        assert_eq!(name.dir, Path::new("root"));
    }

    #[test]
    fn test_album_subdir_rule() {
        assert_eq!(album_subdir_rule("Trip: Jeju", ""), "Trip_ Jeju");
        assert_eq!(album_subdir_rule("A/B", "YYYY"), "A_B/YYYY");
    }
}
