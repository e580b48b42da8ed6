//! Streaming parser for corpus vertical files.
//!
//! A vertical file interleaves SGML-like structure tags with
//! tab-separated token lines. The parser classifies each line and
//! feeds the result into a [LineProcessor]; it never aborts on a
//! malformed line by itself - syntax problems are handed to
//! [LineProcessor::on_parse_error] and the processor decides whether
//! to keep going.

use crate::errors::{ProcError, Result};
use flate2::read::GzDecoder;
use log::info;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// An opening structure tag with its attributes, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    /// Set for self-closing tags (`<name/>`).
    pub is_empty: bool,
}

impl Structure {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A closing structure tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureClose {
    pub name: String,
}

/// A token line: positional columns plus the zero-based index the
/// parser assigned to the token (monotonic across the file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub idx: usize,
    pub columns: Vec<String>,
}

impl Token {
    /// Returns a positional attribute by its column index, or an
    /// empty string when the line has fewer columns.
    pub fn pos_attr(&self, idx: usize) -> &str {
        self.columns.get(idx).map(String::as_str).unwrap_or("")
    }
}

/// Receiver of parser events. Returning `Err` stops the parse; the
/// error is propagated to the caller of [VerticalParser::parse_file].
pub trait LineProcessor {
    fn on_token(&mut self, tk: Token, line: usize) -> Result<()>;
    fn on_struct_open(&mut self, st: Structure, line: usize) -> Result<()>;
    fn on_struct_close(&mut self, st: StructureClose, line: usize) -> Result<()>;
    fn on_parse_error(&mut self, line: usize, err: ProcError) -> Result<()>;
}

pub struct VerticalParser {
    open_re: Regex,
    close_re: Regex,
    attr_re: Regex,
    /// Emit an informational progress log line each Nth input line
    /// (0 disables).
    log_step: usize,
}

impl VerticalParser {
    pub fn new(log_step: usize) -> VerticalParser {
        VerticalParser {
            open_re: Regex::new(r#"^<([\w][\w.:-]*)((?:\s+[\w][\w.:-]*\s*=\s*"[^"]*")*)\s*(/?)>$"#)
                .expect("valid open tag pattern"),
            close_re: Regex::new(r"^</([\w][\w.:-]*)\s*>$").expect("valid close tag pattern"),
            attr_re: Regex::new(r#"([\w][\w.:-]*)\s*=\s*"([^"]*)""#)
                .expect("valid attribute pattern"),
            log_step,
        }
    }

    /// Parses a single vertical file (gzip-compressed when the path
    /// ends with `.gz`/`.tgz`), feeding events into `proc`.
    /// Line numbers are zero-based.
    pub fn parse_file(&self, path: &Path, proc: &mut dyn LineProcessor) -> Result<()> {
        let file = File::open(path)?;
        let path_str = path.to_string_lossy();
        if path_str.ends_with(".gz") || path_str.ends_with(".tgz") {
            self.parse_reader(BufReader::new(GzDecoder::new(file)), proc)
        } else {
            self.parse_reader(BufReader::new(file), proc)
        }
    }

    /// Parses vertical data from any buffered reader.
    pub fn parse_reader<R: Read>(
        &self,
        reader: BufReader<R>,
        proc: &mut dyn LineProcessor,
    ) -> Result<()> {
        let mut token_idx = 0usize;
        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if self.log_step > 0 && line_num > 0 && line_num % self.log_step == 0 {
                info!("processed {line_num} lines");
            }
            if line.is_empty() {
                continue;
            }
            if line.starts_with("</") {
                match self.close_re.captures(line) {
                    Some(caps) => proc.on_struct_close(
                        StructureClose {
                            name: caps[1].to_owned(),
                        },
                        line_num,
                    )?,
                    None => proc.on_parse_error(
                        line_num,
                        ProcError::ParseSyntax {
                            line: line_num,
                            message: format!("malformed closing tag: {line}"),
                        },
                    )?,
                }
            } else if line.starts_with('<') {
                match self.parse_open_tag(line) {
                    Some(st) => proc.on_struct_open(st, line_num)?,
                    None => proc.on_parse_error(
                        line_num,
                        ProcError::ParseSyntax {
                            line: line_num,
                            message: format!("malformed structure tag: {line}"),
                        },
                    )?,
                }
            } else {
                let columns = line.split('\t').map(str::to_owned).collect();
                proc.on_token(
                    Token {
                        idx: token_idx,
                        columns,
                    },
                    line_num,
                )?;
                token_idx += 1;
            }
        }
        Ok(())
    }

    fn parse_open_tag(&self, line: &str) -> Option<Structure> {
        let caps = self.open_re.captures(line)?;
        let attrs = self
            .attr_re
            .captures_iter(caps.get(2).map_or("", |m| m.as_str()))
            .map(|a| (a[1].to_owned(), unescape_entities(&a[2])))
            .collect();
        Some(Structure {
            name: caps[1].to_owned(),
            attrs,
            is_empty: &caps[3] == "/",
        })
    }
}

/// Decodes the XML entities permitted in attribute values.
fn unescape_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_owned();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let mut replaced = false;
        for (entity, ch) in [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ] {
            if let Some(tail) = rest.strip_prefix(entity) {
                out.push(ch);
                rest = tail;
                replaced = true;
                break;
            }
        }
        if !replaced {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::errors::ExtractError;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl LineProcessor for Recorder {
        fn on_token(&mut self, tk: Token, _line: usize) -> Result<()> {
            self.events
                .push(format!("tok:{}:{}", tk.idx, tk.columns.join(",")));
            Ok(())
        }

        fn on_struct_open(&mut self, st: Structure, _line: usize) -> Result<()> {
            let attrs = st
                .attrs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",");
            let empty = if st.is_empty { "/" } else { "" };
            self.events.push(format!("open:{}{}:{}", st.name, empty, attrs));
            Ok(())
        }

        fn on_struct_close(&mut self, st: StructureClose, _line: usize) -> Result<()> {
            self.events.push(format!("close:{}", st.name));
            Ok(())
        }

        fn on_parse_error(&mut self, _line: usize, err: ProcError) -> Result<()> {
            self.events.push(format!("err:{err}"));
            Ok(())
        }
    }

    fn parse(data: &str) -> Vec<String> {
        let parser = VerticalParser::new(0);
        let mut rec = Recorder::default();
        parser
            .parse_reader(BufReader::new(data.as_bytes()), &mut rec)
            .unwrap();
        rec.events
    }

    #[test]
    fn classifies_lines() {
        let events = parse("<doc id=\"d1\" title=\"On Poetry\">\nword\tlemma\ttag\n</doc>\n");
        assert_eq!(
            events,
            [
                "open:doc:id=d1,title=On Poetry",
                "tok:0:word,lemma,tag",
                "close:doc",
            ]
        );
    }

    #[test]
    fn token_indices_are_monotonic() {
        let events = parse("a\n<p>\nb\n</p>\nc\n");
        assert_eq!(events[0], "tok:0:a");
        assert_eq!(events[2], "tok:1:b");
        assert_eq!(events[4], "tok:2:c");
    }

    #[test]
    fn self_closing_tag() {
        let events = parse("<pb n=\"7\"/>\n");
        assert_eq!(events, ["open:pb/:n=7"]);
    }

    #[test]
    fn attribute_entities_unescaped() {
        let events = parse("<doc title=\"Q &amp; A &lt;vol. 1&gt;\">\n");
        assert_eq!(events, ["open:doc:title=Q & A <vol. 1>"]);
    }

    #[test]
    fn malformed_tag_reports_error() {
        let events = parse("<doc id=broken>\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("err:"));
    }

    #[test]
    fn empty_lines_skipped() {
        let events = parse("\n\nword\n\n");
        assert_eq!(events, ["tok:0:word"]);
    }

    #[test]
    fn processor_error_stops_parse() {
        struct Stopper;
        impl LineProcessor for Stopper {
            fn on_token(&mut self, _tk: Token, _line: usize) -> Result<()> {
                Err(ExtractError::Cancelled)
            }
            fn on_struct_open(&mut self, _st: Structure, _line: usize) -> Result<()> {
                Ok(())
            }
            fn on_struct_close(&mut self, _st: StructureClose, _line: usize) -> Result<()> {
                Ok(())
            }
            fn on_parse_error(&mut self, _line: usize, _err: ProcError) -> Result<()> {
                Ok(())
            }
        }
        let parser = VerticalParser::new(0);
        let res = parser.parse_reader(BufReader::new("a\nb\n".as_bytes()), &mut Stopper);
        assert!(matches!(res, Err(ExtractError::Cancelled)));
    }
}
