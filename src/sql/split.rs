/// Iterator over the statements of a `;`-separated blob.
///
/// Single-quoted literals and double-quoted identifiers are skipped over (a
/// doubled quote is an escape), so a `;` inside either never ends a statement.
#[derive(Debug, Clone)]
pub struct Statements<'a> {
    rest: &'a str,
}

pub fn split(blob: &str) -> Statements<'_> {
    Statements { rest: blob }
}

impl<'a> Iterator for Statements<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        while !self.rest.is_empty() {
            let rest = self.rest;
            let bytes = rest.as_bytes();
            let mut quote: Option<u8> = None;
            let mut end = None;
            let mut i = 0;

            while i < bytes.len() {
                match (quote, bytes[i]) {
                    (Some(q), b) if b == q => {
                        if bytes.get(i + 1) == Some(&q) {
                            i += 1;
                        } else {
                            quote = None;
                        }
                    }
                    (Some(_), _) => {}
                    (None, b @ (b'\'' | b'"')) => quote = Some(b),
                    (None, b';') => {
                        end = Some(i);
                        break;
                    }
                    (None, _) => {}
                }
                i += 1;
            }

            // Quotes and `;` are ASCII, so slicing around them stays on char boundaries
            let statement = match end {
                Some(i) => {
                    self.rest = &rest[i + 1..];
                    &rest[..i]
                }
                None => {
                    self.rest = "";
                    rest
                }
            };

            let statement = statement.trim();
            if !statement.is_empty() {
                return Some(statement);
            }
        }
        None
    }
}
