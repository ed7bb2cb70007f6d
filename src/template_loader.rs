//! Template sources.
//!
//! The engine asks a [`TemplateSource`] for the text of named templates.
//! [`MemorySource`] keeps templates in memory and can fill itself from XML
//! template libraries:
//!
//! ```xml
//! <templates namespace="cards">
//!     <template id="user">{{ name }} ({{ email }})</template>
//! </templates>
//! ```
//!
//! Each `<template>` is stored under `namespace.id` with its inner text kept
//! verbatim, markup included.

use crate::Result;
use crate::error::TemplateError;
use dashmap::DashMap;
use glob::glob;
use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::fs;
use std::path::Path;

/// Provider of template source text by name.
pub trait TemplateSource: Send + Sync {
    /// `Ok(None)` when the name is unknown.
    fn load_source(&self, name: &str) -> Result<Option<String>>;
}

/// Concurrent in-memory template store.
#[derive(Debug, Default)]
pub struct MemorySource {
    templates: DashMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a template.
    pub fn add(&self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        self.templates.remove(name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn clear(&self) {
        self.templates.clear();
    }

    /// Load every template library file matching `pattern`,
    /// e.g. `"templates/**/*.xml"`.
    pub fn load(&self, pattern: &str) -> Result<()> {
        let paths = glob(pattern)
            .map_err(|e| TemplateError::Loader(format!("invalid glob pattern '{}': {}", pattern, e)))?;
        for entry in paths {
            let path = entry
                .map_err(|e| TemplateError::Loader(format!("cannot read path: {}", e)))?;
            if path.is_file() {
                self.load_file(&path)?;
            }
        }
        Ok(())
    }

    /// Load libraries embedded as `(path, content)` pairs, as produced by
    /// `template_assets!`.
    pub fn load_assets(&self, assets: Vec<(&str, &str)>) -> Result<()> {
        for (source, content) in assets {
            self.parse_and_register(content, source)?;
        }
        Ok(())
    }

    fn load_file(&self, path: &Path) -> Result<()> {
        let xml = fs::read_to_string(path).map_err(|e| {
            TemplateError::Loader(format!("failed to read {}: {}", path.display(), e))
        })?;
        self.parse_and_register(&xml, &path.display().to_string())
    }

    fn parse_and_register(&self, xml: &str, source: &str) -> Result<()> {
        let library = parse_library(xml, source)?;
        let count = library.templates.len();

        // Nothing from the library is stored unless every name is free.
        let named: Vec<(String, String)> = library
            .templates
            .into_iter()
            .map(|(id, content)| (format!("{}.{}", library.namespace, id), content))
            .collect();
        if let Some((name, _)) = named.iter().find(|(name, _)| self.templates.contains_key(name)) {
            return Err(TemplateError::Loader(format!(
                "duplicate template '{}' (source: {})",
                name, source
            )));
        }
        for (name, content) in named {
            self.templates.insert(name, content);
        }
        debug!(
            "Loaded {} templates into namespace '{}' from {}",
            count, library.namespace, source
        );
        Ok(())
    }
}

impl TemplateSource for MemorySource {
    fn load_source(&self, name: &str) -> Result<Option<String>> {
        Ok(self.templates.get(name).map(|t| t.value().clone()))
    }
}

struct Library {
    namespace: String,
    templates: Vec<(String, String)>,
}

const LIBRARY_TAG: &str = "templates";
const TEMPLATE_TAG: &str = "template";

fn parse_library(xml: &str, source: &str) -> Result<Library> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut namespace = None;
    let mut templates = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.name();
                let tag = String::from_utf8_lossy(name.as_ref()).into_owned();

                if tag == LIBRARY_TAG {
                    namespace = get_attribute(e, "namespace");
                } else if tag == TEMPLATE_TAG {
                    let id = get_attribute(e, "id").ok_or_else(|| {
                        TemplateError::Loader(format!("template without id attribute (source: {})", source))
                    })?;
                    if templates.iter().any(|(t, _)| *t == id) {
                        return Err(TemplateError::Loader(format!(
                            "duplicate template id '{}' (source: {})",
                            id, source
                        )));
                    }

                    let start = reader.buffer_position() as usize;
                    let end = read_until_end_tag(&mut reader, &tag, &mut Vec::new())?;
                    // `end` is just past `</template>`.
                    let close_len = tag.len() + 3;
                    if end < start + close_len {
                        return Err(TemplateError::Loader(format!(
                            "malformed template '{}' (source: {})",
                            id, source
                        )));
                    }
                    let content = unwrap_cdata(&xml[start..end - close_len]);
                    templates.push((id, content.to_string()));
                }
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == TEMPLATE_TAG.as_bytes() => {
                let id = get_attribute(e, "id").ok_or_else(|| {
                    TemplateError::Loader(format!("template without id attribute (source: {})", source))
                })?;
                templates.push((id, String::new()));
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(TemplateError::Loader(format!(
                    "XML error: {} (source: {})",
                    e, source
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    let namespace = namespace.ok_or_else(|| {
        TemplateError::Loader(format!("<templates> is missing the namespace attribute (source: {})", source))
    })?;
    Ok(Library {
        namespace,
        templates,
    })
}

/// Reads to the matching end tag and returns the position just past it.
fn read_until_end_tag(reader: &mut Reader<&[u8]>, target_tag: &str, buf: &mut Vec<u8>) -> Result<usize> {
    let mut depth = 0;
    loop {
        match reader.read_event_into(buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == target_tag.as_bytes() => depth += 1,
            Ok(Event::End(ref e)) if e.name().as_ref() == target_tag.as_bytes() => {
                if depth == 0 {
                    return Ok(reader.buffer_position() as usize);
                }
                depth -= 1;
            }
            Ok(Event::Eof) => {
                return Err(TemplateError::Loader(format!("missing end tag </{}>", target_tag)));
            }
            Err(e) => return Err(TemplateError::Loader(format!("XML error: {}", e))),
            _ => {}
        }
        buf.clear();
    }
}

fn get_attribute(e: &BytesStart, key: &str) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == key.as_bytes())
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// A body that is a single CDATA section yields the section's text.
fn unwrap_cdata(content: &str) -> &str {
    content
        .trim()
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
        .unwrap_or(content)
}
