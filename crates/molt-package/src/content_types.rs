use std::collections::BTreeSet;
use std::path::Path;

use log::{debug, info};
use molt_platform::fs::write_atomic;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::PackageError;

pub const CONTENT_TYPES_FILE: &str = "[Content_Types].xml";

const DELTA_CONTENT_TYPES: [(&str, &str); 4] = [
    ("diff", "application/octet"),
    ("exe", "application/octet"),
    ("dll", "application/octet"),
    ("shasum", "text/plain"),
];

const EMPTY_CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="utf-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"></Types>"#;

/// Make sure the package's content-type declarations cover the entry kinds
/// found in delta packages. Idempotent.
pub fn ensure_delta_content_types(dir: &Path) -> Result<(), PackageError> {
    let path = dir.join(CONTENT_TYPES_FILE);
    let xml = if path.exists() {
        std::fs::read_to_string(&path).map_err(|error| {
            PackageError::io_with_path("failed to read content types", &path, &error)
        })?
    } else {
        info!("{} missing, creating it", path.display());
        EMPTY_CONTENT_TYPES.to_string()
    };

    let merged = merge_content_types(&xml)?;
    if merged != xml {
        write_atomic(&path, merged.as_bytes()).map_err(|error| {
            PackageError::io_with_path("failed to write content types", &path, &error)
        })?;
    }
    Ok(())
}

/// Append a `<Default>` declaration for every delta extension not already
/// declared (compared case-insensitively).
pub fn merge_content_types(xml: &str) -> Result<String, PackageError> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut events = Vec::new();
    let mut declared = BTreeSet::new();
    let mut depth = 0_usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|error| PackageError::xml("failed to parse content types", error))?;
        match &event {
            Event::Eof => break,
            Event::Start(element) | Event::Empty(element) => {
                if depth == 0 && !element.local_name().as_ref().eq_ignore_ascii_case(b"types") {
                    return Err(PackageError::xml(
                        "invalid content types",
                        "expected root node should be 'Types'",
                    ));
                }
                if depth == 1 && element.local_name().as_ref().eq_ignore_ascii_case(b"default") {
                    for attr in element.attributes().flatten() {
                        if attr.key.local_name().as_ref().eq_ignore_ascii_case(b"extension") {
                            declared.insert(
                                String::from_utf8_lossy(&attr.value).to_ascii_lowercase(),
                            );
                        }
                    }
                }
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            _ => {}
        }
        events.push(event);
    }

    let missing: Vec<_> = DELTA_CONTENT_TYPES
        .iter()
        .filter(|(extension, _)| !declared.contains(*extension))
        .collect();
    if missing.is_empty() {
        return Ok(xml.to_string());
    }

    depth = 0;
    for event in events {
        match event {
            Event::Start(element) => {
                depth += 1;
                write(&mut writer, Event::Start(element))?;
            }
            Event::End(end) => {
                depth -= 1;
                if depth == 0 {
                    write_defaults(&mut writer, &missing)?;
                }
                write(&mut writer, Event::End(end))?;
            }
            Event::Empty(element) if depth == 0 => {
                let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                write(&mut writer, Event::Start(element))?;
                write_defaults(&mut writer, &missing)?;
                write(&mut writer, Event::End(BytesEnd::new(name)))?;
            }
            other => write(&mut writer, other)?,
        }
    }

    debug!("Declared {} delta content types", missing.len());
    String::from_utf8(writer.into_inner())
        .map_err(|error| PackageError::xml("content types are not UTF-8", error))
}

fn write_defaults(
    writer: &mut Writer<Vec<u8>>,
    missing: &[&(&str, &str)],
) -> Result<(), PackageError> {
    for (extension, content_type) in missing {
        let element = BytesStart::new("Default")
            .with_attributes([("Extension", *extension), ("ContentType", *content_type)]);
        write(writer, Event::Empty(element))?;
    }
    Ok(())
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), PackageError> {
    writer
        .write_event(event)
        .map_err(|error| PackageError::xml("failed to write content types", error))
}
