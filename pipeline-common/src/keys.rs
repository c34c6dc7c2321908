/// Key construction for the key-addressed storage collaborator.
///
/// All load/save operations address payloads with keys of the form
/// `{name}/{group}[.{subgroup}]/{name}_{key}.{extension}`, where the segments
/// are substituted from run parameters (series name, image key, channel,
/// seed). The core never builds storage paths beyond this pattern.

/// Folder portion of a key: `{name}/{group}` or `{name}/{group}.{subgroup}/`.
pub fn make_folder_key(name: &str, group: &str, subgroup: &str) -> String {
    if subgroup.is_empty() {
        format!("{name}/{group}/")
    } else {
        format!("{name}/{group}/{group}.{subgroup}/")
    }
}

/// File portion of a key: `{name}_{key}.{extension}`, where empty segments
/// collapse cleanly.
pub fn make_file_key(name: &str, key: &str, extensions: &[&str]) -> String {
    let key = if key.is_empty() {
        String::new()
    } else {
        format!("_{key}")
    };
    let extension = extensions
        .iter()
        .filter(|ext| !ext.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(".");
    if extension.is_empty() {
        format!("{name}{key}")
    } else {
        format!("{name}{key}.{extension}")
    }
}

/// Full key: folder + file.
pub fn make_full_key(
    name: &str,
    group: &str,
    subgroup: &str,
    key: &str,
    extensions: &[&str],
) -> String {
    format!(
        "{}{}",
        make_folder_key(name, group, subgroup),
        make_file_key(name, key, extensions)
    )
}

/// Key segment for a channel index, zero padded as `C{channel:02}`.
pub fn channel_segment(key: &str, channel: usize) -> String {
    format!("{key}_C{channel:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_key_with_and_without_subgroup() {
        assert_eq!(make_folder_key("series", "images", ""), "series/images/");
        assert_eq!(
            make_folder_key("series", "samples", "RAW"),
            "series/samples/samples.RAW/"
        );
    }

    #[test]
    fn file_key_joins_extensions() {
        assert_eq!(
            make_file_key("series", "A1", &["RAW", "csv"]),
            "series_A1.RAW.csv"
        );
        assert_eq!(make_file_key("series", "", &["xml"]), "series.xml");
    }

    #[test]
    fn full_key_matches_storage_pattern() {
        let key = make_full_key(
            "series",
            "samples",
            "RAW",
            &channel_segment("A1", 0),
            &["RAW", "csv"],
        );
        assert_eq!(key, "series/samples/samples.RAW/series_A1_C00.RAW.csv");
    }
}
