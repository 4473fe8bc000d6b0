//! Reference rewriting after renames
//!
//! Once files have been renamed, two documents may still point at the old
//! names: the structured metadata document (YAML) and the table of contents.
//! Both are rewritten using exact matches against the [FilenameMapping] keys
//! only, so a value that merely contains an old name is never touched.

use std::{fs, path::Path};

use serde_yaml::Value;

use crate::{
    document::{Document, Element},
    error::PrepError,
    report::Reporter,
    types::FilenameMapping,
    utils::DecodeBytes,
};

/// Rewrites every string leaf of the metadata document found in `mapping`
///
/// Mapping keys of the YAML document are left alone; sequences and nested
/// mappings are traversed; non-string scalars pass through unchanged.
///
/// ## Return
/// - `Ok(true)`: the document was found and written back
/// - `Ok(false)`: the document does not exist; a warning was reported
/// - `Err(PrepError)`: the document could not be parsed or written
pub fn update_yaml_references(
    yaml_path: &Path,
    mapping: &FilenameMapping,
    reporter: &dyn Reporter,
) -> Result<bool, PrepError> {
    if !yaml_path.is_file() {
        reporter.warn(&format!(
            "YAML file {} not found; skipping update.",
            yaml_path.display()
        ));
        return Ok(false);
    }

    let content = fs::read_to_string(yaml_path)?;
    let mut data: Value =
        serde_yaml::from_str(&content).map_err(|source| PrepError::MalformedMetadata {
            path: yaml_path.to_string_lossy().to_string(),
            source,
        })?;

    let replaced = replace_in_value(&mut data, mapping, reporter);

    fs::write(yaml_path, serde_yaml::to_string(&data)?)?;
    reporter.info(&format!(
        "Updated references in {} ({} replaced).",
        yaml_path.display(),
        replaced
    ));

    Ok(true)
}

/// Replaces exact-match string leaves in place, returning the number replaced
pub fn replace_in_value(
    value: &mut Value,
    mapping: &FilenameMapping,
    reporter: &dyn Reporter,
) -> usize {
    match value {
        Value::String(text) => match mapping.get(text) {
            Some(new) => {
                reporter.info(&format!("Updating YAML reference {} → {}", text, new));
                *text = new.to_string();
                1
            }
            None => 0,
        },
        Value::Sequence(items) => items
            .iter_mut()
            .map(|item| replace_in_value(item, mapping, reporter))
            .sum(),
        Value::Mapping(map) => map
            .iter_mut()
            .map(|(_, item)| replace_in_value(item, mapping, reporter))
            .sum(),
        Value::Tagged(tagged) => replace_in_value(&mut tagged.value, mapping, reporter),
        Value::Null | Value::Bool(_) | Value::Number(_) => 0,
    }
}

/// Rewrites hyperlink targets in the table of contents
///
/// Every `<a href>` whose target exactly matches an old path is pointed at
/// the new path. The file is only written when at least one link changed.
///
/// ## Return
/// - `Ok(n)`: number of links rewritten (zero when the TOC does not exist)
/// - `Err(PrepError)`: the TOC could not be read, parsed or written
pub fn update_toc(
    toc_path: &Path,
    mapping: &FilenameMapping,
    reporter: &dyn Reporter,
) -> Result<usize, PrepError> {
    if !toc_path.is_file() {
        reporter.warn(&format!(
            "TOC file {} not found; skipping update.",
            toc_path.display()
        ));
        return Ok(0);
    }

    let content = fs::read(toc_path)?.decode()?;
    let mut document = Document::parse(&content)?;

    let mut replaced = 0;
    document.walk_mut(&mut |element: &mut Element| {
        if !element.is("a") {
            return;
        }
        let Some(href) = element.get_attr("href") else {
            return;
        };
        if let Some(new) = mapping.get(&href) {
            reporter.info(&format!("Updating TOC link {} → {}", href, new));
            element.set_attr("href", new);
            replaced += 1;
        }
    });

    if replaced > 0 {
        fs::write(toc_path, document.to_xhtml()?)?;
        reporter.info(&format!(
            "Rewrote TOC file {} with updated links.",
            toc_path.display()
        ));
    }

    Ok(replaced)
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use serde_yaml::Value;

    use crate::{
        error::PrepError,
        references::{replace_in_value, update_toc, update_yaml_references},
        report::MemoryReporter,
        types::FilenameMapping,
        utils::local_time,
    };

    fn mapping() -> FilenameMapping {
        let mut mapping = FilenameMapping::new();
        mapping.insert("Chapter One_Final.xhtml", "chapter-one.xhtml");
        mapping.insert("Quiz Key.xhtml", "quiz-key.xhtml");
        mapping
    }

    #[test]
    fn test_replace_in_value_exact_matches_only() {
        let mut value: Value = serde_yaml::from_str(
            r#"
book:
  title: Chapter One_Final.xhtml draft
  chapters:
    - Chapter One_Final.xhtml
    - chapter-one.xhtml
    - file: Quiz Key.xhtml
      pages: 3
  Chapter One_Final.xhtml: key stays
"#,
        )
        .unwrap();

        let reporter = MemoryReporter::new();
        let replaced = replace_in_value(&mut value, &mapping(), &reporter);

        assert_eq!(replaced, 2);
        let book = &value["book"];
        assert_eq!(book["title"].as_str(), Some("Chapter One_Final.xhtml draft"));
        assert_eq!(book["chapters"][0].as_str(), Some("chapter-one.xhtml"));
        // A value equal to a mapping *value* is not touched
        assert_eq!(book["chapters"][1].as_str(), Some("chapter-one.xhtml"));
        assert_eq!(book["chapters"][2]["file"].as_str(), Some("quiz-key.xhtml"));
        assert_eq!(book["chapters"][2]["pages"].as_u64(), Some(3));
        assert_eq!(book["Chapter One_Final.xhtml"].as_str(), Some("key stays"));
    }

    #[test]
    fn test_update_yaml_missing_file_is_skipped() {
        let path = env::temp_dir().join(format!("{}-missing.yaml", local_time()));
        let reporter = MemoryReporter::new();

        assert!(!update_yaml_references(&path, &mapping(), &reporter).unwrap());
        assert!(reporter.contains("not found; skipping update"));
    }

    #[test]
    fn test_update_yaml_malformed_is_fatal() {
        let path = env::temp_dir().join(format!("{}-broken.yaml", local_time()));
        fs::write(&path, "book: [unclosed").unwrap();

        let result = update_yaml_references(&path, &mapping(), &MemoryReporter::new());
        assert_eq!(
            result.unwrap_err(),
            PrepError::MalformedMetadata {
                path: path.to_string_lossy().to_string(),
                source: serde_yaml::from_str::<Value>("[").unwrap_err(),
            }
        );

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_update_yaml_rewrites_file() {
        let path = env::temp_dir().join(format!("{}-book-map.yaml", local_time()));
        fs::write(&path, "book:\n  toc:\n    - Chapter One_Final.xhtml\n").unwrap();

        assert!(update_yaml_references(&path, &mapping(), &MemoryReporter::new()).unwrap());

        let written: Value = serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["book"]["toc"][0].as_str(), Some("chapter-one.xhtml"));

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_update_toc_rewrites_links() {
        let path = env::temp_dir().join(format!("{}-toc.xhtml", local_time()));
        fs::write(
            &path,
            r#"<html><body><nav><ol>
<li><a href="Chapter One_Final.xhtml">One</a></li>
<li><a href="Chapter One_Final.xhtml#s1">One, part 1</a></li>
<li><a href="intro.xhtml">Intro</a></li>
</ol></nav></body></html>"#,
        )
        .unwrap();

        let reporter = MemoryReporter::new();
        assert_eq!(update_toc(&path, &mapping(), &reporter).unwrap(), 1);

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains(r#"<a href="chapter-one.xhtml">One</a>"#));
        assert!(written.contains(r#"<a href="Chapter One_Final.xhtml#s1">"#));
        assert!(reporter.contains("Updating TOC link Chapter One_Final.xhtml → chapter-one.xhtml"));

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_update_toc_without_matches_leaves_file() {
        let path = env::temp_dir().join(format!("{}-toc-untouched.xhtml", local_time()));
        let original = "<html><body><a href='intro.xhtml'>Intro</a></body></html>";
        fs::write(&path, original).unwrap();

        assert_eq!(
            update_toc(&path, &mapping(), &MemoryReporter::new()).unwrap(),
            0
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), original);

        fs::remove_file(path).unwrap();
    }
}
