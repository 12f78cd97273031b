//! Caddyfile as an ordered list of items.
//!
//! Only site blocks addressed by a single `http://` or `https://` URL are
//! understood. Everything else (global options, comments, other sites) is kept as
//! opaque text and written back byte for byte.

use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// Routing block for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteBlock {
    pub scheme: Scheme,
    pub domain: String,
    raw: String,
}

impl SiteBlock {
    /// Render the block that proxies `domain` to the local `port`.
    ///
    /// `tls` names the certificate and key files; without it the site is served over
    /// plain HTTP.
    pub fn render(domain: &str, port: u16, tls: Option<(&Path, &Path)>) -> Self {
        let scheme = if tls.is_some() {
            Scheme::Https
        } else {
            Scheme::Http
        };
        let mut raw = format!(
            "{}://{domain} {{\n\treverse_proxy 127.0.0.1:{port}\n",
            scheme.as_str()
        );
        if let Some((cert, key)) = tls {
            raw.push_str(&format!(
                "\ttls {} {}\n",
                caddy_token(&cert.to_string_lossy()),
                caddy_token(&key.to_string_lossy())
            ));
        }
        raw.push_str("}\n");
        Self {
            scheme,
            domain: domain.to_string(),
            raw,
        }
    }

    #[cfg(test)]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn caddy_token(value: &str) -> String {
    if value.chars().any(|c| c.is_whitespace() || c == '"') {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    Text(String),
    Site(SiteBlock),
}

impl Item {
    fn raw(&self) -> &str {
        match self {
            Self::Text(raw) => raw,
            Self::Site(site) => &site.raw,
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, Self::Text(raw) if raw.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caddyfile {
    items: Vec<Item>,
}

impl Caddyfile {
    pub fn parse(content: &str) -> Self {
        let mut items = Vec::new();
        let mut lines = content.split_inclusive('\n');

        while let Some(line) = lines.next() {
            if !opens_block(line) {
                items.push(Item::Text(line.to_string()));
                continue;
            }

            let mut raw = line.to_string();
            let mut depth = 1usize;
            while depth > 0 {
                let Some(next) = lines.next() else {
                    break;
                };
                raw.push_str(next);
                if opens_block(next) {
                    depth += 1;
                } else if strip_comment(next) == "}" {
                    depth -= 1;
                }
            }

            // An unterminated block stays opaque.
            let item = match (depth, site_address(line)) {
                (0, Some((scheme, domain))) => Item::Site(SiteBlock {
                    scheme,
                    domain,
                    raw,
                }),
                _ => Item::Text(raw),
            };
            items.push(item);
        }

        Self { items }
    }

    pub fn sites(&self) -> impl Iterator<Item = &SiteBlock> {
        self.items.iter().filter_map(|item| match item {
            Item::Site(site) => Some(site),
            Item::Text(_) => None,
        })
    }

    pub fn find(&self, domain: &str) -> Option<&SiteBlock> {
        self.sites().find(|site| site.domain == domain)
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.find(domain).is_some()
    }

    /// Remove every block for `domain` together with the blank lines before it.
    ///
    /// Returns whether anything was removed.
    pub fn remove_site(&mut self, domain: &str) -> bool {
        let mut removed = false;
        let mut kept: Vec<Item> = Vec::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if matches!(&item, Item::Site(site) if site.domain == domain) {
                while kept.last().is_some_and(Item::is_blank) {
                    kept.pop();
                }
                removed = true;
                continue;
            }
            kept.push(item);
        }
        self.items = kept;
        removed
    }

    /// Append `site` after one blank line, trimming trailing blank space first.
    pub fn append_site(&mut self, site: SiteBlock) {
        while self.items.last().is_some_and(Item::is_blank) {
            self.items.pop();
        }
        if let Some(last) = self.items.last_mut() {
            match last {
                Item::Text(raw) if !raw.ends_with('\n') => {
                    let trimmed = raw.trim_end().to_string();
                    *raw = format!("{trimmed}\n");
                }
                Item::Site(block) if !block.raw.ends_with('\n') => block.raw.push('\n'),
                _ => {}
            }
            self.items.push(Item::Text("\n".to_string()));
        }
        self.items.push(Item::Site(site));
    }
}

impl fmt::Display for Caddyfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            f.write_str(item.raw())?;
        }
        Ok(())
    }
}

/// `line` without its trailing `#` comment, trimmed. A `#` only starts a comment
/// at the beginning of a line or after whitespace.
fn strip_comment(line: &str) -> &str {
    let mut prev_is_space = true;
    for (i, c) in line.char_indices() {
        if c == '#' && prev_is_space {
            return line[..i].trim();
        }
        prev_is_space = c.is_whitespace();
    }
    line.trim()
}

fn opens_block(line: &str) -> bool {
    strip_comment(line).ends_with('{')
}

/// Scheme and domain of a header like `https://blog.test {`.
fn site_address(header: &str) -> Option<(Scheme, String)> {
    let address = strip_comment(header).strip_suffix('{')?.trim();
    if address.contains(char::is_whitespace) || address.contains(',') {
        return None;
    }
    let (scheme, domain) = if let Some(rest) = address.strip_prefix("https://") {
        (Scheme::Https, rest)
    } else if let Some(rest) = address.strip_prefix("http://") {
        (Scheme::Http, rest)
    } else {
        return None;
    };
    (!domain.is_empty()).then(|| (scheme, domain.to_string()))
}
