use serde::Serialize;

use crate::error::MarkupError;

const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TemplateId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Template(TemplateId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    /// Written without `name=` in the source.
    pub positional: bool,
    pub value: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub raw_title: String,
    pub title: String,
    pub params: Vec<Param>,
    pub parent: Option<TemplateId>,
    dropped: bool,
}

impl Template {
    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub fn has(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    /// The last parameter named `name`; later duplicates override earlier ones.
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().rev().find(|param| param.name == name)
    }

    /// Replace the value of `name` in place, or append it as a named parameter.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = vec![Segment::Text(value.into())];
        match self.params.iter_mut().rev().find(|param| param.name == name) {
            Some(param) => param.value = value,
            None => self.params.push(Param {
                name: name.to_string(),
                positional: false,
                value,
            }),
        }
    }
}

/// A page body parsed into text runs and template invocations. Templates live in
/// an arena indexed by [`TemplateId`]; dropping one hides it (and its subtree)
/// from every traversal and from rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    templates: Vec<Template>,
    body: Vec<Segment>,
}

impl Document {
    pub fn parse(text: &str) -> Result<Self, MarkupError> {
        let mut parser = Parser {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            depth: 0,
            templates: Vec::new(),
        };
        let body = parser.parse_body()?;
        Ok(Self {
            templates: parser.templates,
            body,
        })
    }

    pub fn template(&self, id: TemplateId) -> &Template {
        &self.templates[id.0]
    }

    pub fn template_mut(&mut self, id: TemplateId) -> &mut Template {
        &mut self.templates[id.0]
    }

    /// Live templates directly in the page body, in source order.
    pub fn top_level(&self) -> Vec<TemplateId> {
        self.body
            .iter()
            .filter_map(|segment| match segment {
                Segment::Template(id) if !self.templates[id.0].dropped => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Every live template, nested ones included, in document order.
    pub fn all_templates(&self) -> Vec<TemplateId> {
        let mut out = Vec::new();
        self.collect_live(&self.body, &mut out);
        out
    }

    fn collect_live(&self, segments: &[Segment], out: &mut Vec<TemplateId>) {
        for segment in segments {
            if let Segment::Template(id) = segment {
                let template = &self.templates[id.0];
                if template.dropped {
                    continue;
                }
                out.push(*id);
                for param in &template.params {
                    self.collect_live(&param.value, out);
                }
            }
        }
    }

    /// Excise a template. Its subtree goes with it; its parameters stay readable.
    pub fn drop_template(&mut self, id: TemplateId) {
        self.templates[id.0].dropped = true;
    }

    pub fn is_live(&self, id: TemplateId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            let template = &self.templates[node.0];
            if template.dropped {
                return false;
            }
            current = template.parent;
        }
        true
    }

    /// Rendered value of a parameter, if the template has it.
    pub fn param_text(&self, id: TemplateId, name: &str) -> Option<String> {
        self.template(id)
            .param(name)
            .map(|param| self.render_segments(&param.value))
    }

    /// Serializable view of the live tree, for inspection.
    pub fn tree(&self) -> Vec<TemplateView> {
        self.top_level()
            .into_iter()
            .map(|id| self.view(id))
            .collect()
    }

    fn view(&self, id: TemplateId) -> TemplateView {
        let template = &self.templates[id.0];
        let params = template
            .params
            .iter()
            .map(|param| {
                let children = param
                    .value
                    .iter()
                    .filter_map(|segment| match segment {
                        Segment::Template(child) if !self.templates[child.0].dropped => {
                            Some(self.view(*child))
                        }
                        _ => None,
                    })
                    .collect();
                ParamView {
                    name: param.name.clone(),
                    positional: param.positional,
                    value: self.render_segments(&param.value),
                    children,
                }
            })
            .collect();
        TemplateView {
            raw_title: template.raw_title.clone(),
            title: template.title.clone(),
            params,
        }
    }

    pub fn render(&self) -> String {
        self.render_segments(&self.body)
    }

    pub fn render_template(&self, id: TemplateId) -> String {
        let mut out = String::new();
        self.write_template(id, &mut out);
        out
    }

    fn render_segments(&self, segments: &[Segment]) -> String {
        let mut out = String::new();
        self.write_segments(segments, &mut out);
        out
    }

    fn write_segments(&self, segments: &[Segment], out: &mut String) {
        for segment in segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Template(id) => {
                    if !self.templates[id.0].dropped {
                        self.write_template(*id, out);
                    }
                }
            }
        }
    }

    fn write_template(&self, id: TemplateId, out: &mut String) {
        let template = &self.templates[id.0];
        out.push_str("{{");
        out.push_str(&template.title);
        for param in &template.params {
            out.push('|');
            let needs_name = !param.positional
                || matches!(param.value.first(), Some(Segment::Text(text)) if find_name_split(text).is_some());
            if needs_name {
                out.push_str(&param.name);
                out.push('=');
            }
            self.write_segments(&param.value, out);
        }
        out.push_str("}}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateView {
    pub raw_title: String,
    pub title: String,
    pub params: Vec<ParamView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamView {
    pub name: String,
    pub positional: bool,
    pub value: String,
    pub children: Vec<TemplateView>,
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
    templates: Vec<Template>,
}

#[derive(Default)]
struct SegmentBuffer {
    segments: Vec<Segment>,
    text: String,
}

impl SegmentBuffer {
    fn push_str(&mut self, value: &str) {
        self.text.push_str(value);
    }

    fn push_template(&mut self, id: TemplateId) {
        if !self.text.is_empty() {
            self.segments
                .push(Segment::Text(std::mem::take(&mut self.text)));
        }
        self.segments.push(Segment::Template(id));
    }

    fn finish(mut self) -> Vec<Segment> {
        if !self.text.is_empty() {
            self.segments.push(Segment::Text(self.text));
        }
        self.segments
    }
}

impl Parser<'_> {
    fn starts_with(&self, token: &str) -> bool {
        self.bytes[self.pos..].starts_with(token.as_bytes())
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn parse_body(&mut self) -> Result<Vec<Segment>, MarkupError> {
        let mut buffer = SegmentBuffer::default();
        let mut text_start = self.pos;

        while !self.at_end() {
            if self.starts_with("<!--") || self.starts_with("<nowiki>") {
                self.skip_opaque();
            } else if self.starts_with("{{{") {
                self.skip_braces()?;
            } else if self.starts_with("{{") {
                buffer.push_str(&self.text[text_start..self.pos]);
                let id = self.parse_template(None)?;
                buffer.push_template(id);
                text_start = self.pos;
            } else if self.starts_with("}}") {
                return Err(MarkupError::new(self.pos, "unexpected closing braces"));
            } else {
                self.pos += 1;
            }
        }

        buffer.push_str(&self.text[text_start..]);
        Ok(buffer.finish())
    }

    fn parse_template(&mut self, parent: Option<TemplateId>) -> Result<TemplateId, MarkupError> {
        let open = self.pos;
        if self.depth >= MAX_NESTING {
            return Err(MarkupError::new(open, "templates nested too deeply"));
        }
        self.depth += 1;
        self.pos += 2;

        let id = TemplateId(self.templates.len());
        self.templates.push(Template {
            raw_title: String::new(),
            title: String::new(),
            params: Vec::new(),
            parent,
            dropped: false,
        });

        let title_start = self.pos;
        self.scan_title(open)?;
        let raw_title = self.text[title_start..self.pos].trim().to_string();

        let mut params = Vec::new();
        let mut positional_index = 0usize;
        loop {
            if self.starts_with("}}") {
                self.pos += 2;
                break;
            }
            // At a parameter separator.
            self.pos += 1;
            let value = self.parse_value(id, open)?;
            params.push(classify_param(value, &mut positional_index));
        }

        let template = &mut self.templates[id.0];
        template.title = raw_title.clone();
        template.raw_title = raw_title;
        template.params = params;
        self.depth -= 1;
        Ok(id)
    }

    /// Advance to the `|` or `}}` ending a template title. Nested braces in a
    /// title are kept verbatim.
    fn scan_title(&mut self, open: usize) -> Result<(), MarkupError> {
        loop {
            if self.at_end() {
                return Err(MarkupError::new(open, "unclosed template"));
            }
            if self.starts_with("{{") {
                self.skip_braces()?;
            } else if self.starts_with("}}") || self.bytes[self.pos] == b'|' {
                return Ok(());
            } else {
                self.pos += 1;
            }
        }
    }

    fn parse_value(&mut self, parent: TemplateId, open: usize) -> Result<Vec<Segment>, MarkupError> {
        let mut buffer = SegmentBuffer::default();
        let mut text_start = self.pos;
        let mut link_depth = 0usize;

        loop {
            if self.at_end() {
                return Err(MarkupError::new(open, "unclosed template"));
            }
            if self.starts_with("<!--") || self.starts_with("<nowiki>") {
                self.skip_opaque();
            } else if self.starts_with("{{{") {
                self.skip_braces()?;
            } else if self.starts_with("{{") {
                buffer.push_str(&self.text[text_start..self.pos]);
                let id = self.parse_template(Some(parent))?;
                buffer.push_template(id);
                text_start = self.pos;
            } else if self.starts_with("}}") {
                break;
            } else if self.starts_with("[[") {
                link_depth += 1;
                self.pos += 2;
            } else if link_depth > 0 && self.starts_with("]]") {
                link_depth -= 1;
                self.pos += 2;
            } else if link_depth == 0 && self.bytes[self.pos] == b'|' {
                break;
            } else {
                self.pos += 1;
            }
        }

        buffer.push_str(&self.text[text_start..self.pos]);
        Ok(buffer.finish())
    }

    /// Skip a `{{...}}` or `{{{...}}}` construct without building nodes for it.
    /// Open constructs are tracked on an explicit stack bounded by the nesting limit.
    fn skip_braces(&mut self) -> Result<(), MarkupError> {
        // (offset, triple) per open construct.
        let mut frames: Vec<(usize, bool)> = Vec::new();
        self.open_frame(&mut frames)?;

        while let Some(&(open, triple)) = frames.last() {
            if self.at_end() {
                return Err(MarkupError::new(open, "unclosed braces"));
            }
            if triple && self.starts_with("}}}") {
                self.pos += 3;
                frames.pop();
            } else if !triple && self.starts_with("}}") {
                self.pos += 2;
                frames.pop();
            } else if self.starts_with("{{") {
                self.open_frame(&mut frames)?;
            } else {
                self.pos += 1;
            }
        }
        Ok(())
    }

    fn open_frame(&mut self, frames: &mut Vec<(usize, bool)>) -> Result<(), MarkupError> {
        if self.depth + frames.len() >= MAX_NESTING {
            return Err(MarkupError::new(self.pos, "braces nested too deeply"));
        }
        let triple = self.starts_with("{{{");
        frames.push((self.pos, triple));
        self.pos += if triple { 3 } else { 2 };
        Ok(())
    }

    /// Comments and `<nowiki>` bodies are copied through untouched. An unclosed
    /// one runs to the end of the text.
    fn skip_opaque(&mut self) {
        let close = if self.starts_with("<!--") {
            "-->"
        } else {
            "</nowiki>"
        };
        match self.text[self.pos..].find(close) {
            Some(offset) => self.pos += offset + close.len(),
            None => self.pos = self.bytes.len(),
        }
    }
}

/// Byte offset of the `=` separating a parameter name from its value, ignoring
/// any `=` inside a wikilink.
fn find_name_split(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut link_depth = 0usize;
    let mut index = 0usize;
    while index < bytes.len() {
        if bytes[index..].starts_with(b"[[") {
            link_depth += 1;
            index += 2;
            continue;
        }
        if link_depth > 0 && bytes[index..].starts_with(b"]]") {
            link_depth -= 1;
            index += 2;
            continue;
        }
        if link_depth == 0 && bytes[index] == b'=' {
            return Some(index);
        }
        index += 1;
    }
    None
}

fn classify_param(mut value: Vec<Segment>, positional_index: &mut usize) -> Param {
    let split = match value.first() {
        Some(Segment::Text(text)) => find_name_split(text).map(|at| {
            let name = text[..at].trim().to_string();
            let rest = text[at + 1..].to_string();
            (name, rest)
        }),
        _ => None,
    };

    match split {
        Some((name, rest)) => {
            value[0] = Segment::Text(rest);
            trim_segments(&mut value);
            Param {
                name,
                positional: false,
                value,
            }
        }
        None => {
            *positional_index += 1;
            Param {
                name: positional_index.to_string(),
                positional: true,
                value,
            }
        }
    }
}

/// Named parameter values lose surrounding whitespace, as MediaWiki does.
fn trim_segments(value: &mut Vec<Segment>) {
    if let Some(Segment::Text(text)) = value.first_mut() {
        *text = text.trim_start().to_string();
    }
    if let Some(Segment::Text(text)) = value.last_mut() {
        *text = text.trim_end().to_string();
    }
    value.retain(|segment| !matches!(segment, Segment::Text(text) if text.is_empty()));
}
