//! Line based editing of YAML manifests, leaving everything but the edited value untouched.

use std::ops::Range;

/// Byte ranges of the documents of a multi-document YAML stream.
///
/// Separator lines are not part of any document. A stream starting with a separator has an
/// empty first document.
pub fn documents(text: &str) -> Vec<Range<usize>> {
    let mut documents = vec![];
    let mut start = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if is_separator(line) {
            documents.push(start..offset);
            start = offset + line.len();
        }
        offset += line.len();
    }
    documents.push(start..text.len());

    documents
}

fn is_separator(line: &str) -> bool {
    let line = line.trim_end();
    line == "---" || line.starts_with("--- ")
}

/// Replace the image of a container, in the given document.
///
/// Returns `None` if the document or container cannot be found.
pub fn set_image(text: &str, document: usize, container: &str, image: &str) -> Option<String> {
    let range = documents(text).get(document)?.clone();
    let value = find_image(&text[range.clone()], container)?;
    let value = range.start + value.start..range.start + value.end;

    let mut result = String::with_capacity(text.len() + image.len());
    result.push_str(&text[..value.start]);
    result.push_str(image);
    result.push_str(&text[value.end..]);
    Some(result)
}

/// A list item in a `containers` or `initContainers` list.
#[derive(Default)]
struct Item {
    name: Option<String>,
    image: Option<Range<usize>>,
}

/// Locate the (unquoted) image value of a container.
fn find_image(doc: &str, container: &str) -> Option<Range<usize>> {
    // indentation of the list key, and of its items once known
    let mut list: Option<(usize, Option<usize>)> = None;
    let mut item: Option<Item> = None;
    let mut offset = 0;

    for line in doc.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let content = line.trim_end();
        let trimmed = content.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = content.len() - trimmed.len();

        if let Some((key_indent, item_indent)) = &mut list {
            let is_item = trimmed.starts_with("- ") || trimmed == "-";
            if indent < *key_indent || (indent == *key_indent && !is_item) {
                if let Some(found) = item.take().and_then(|i| matches(i, container)) {
                    return Some(found);
                }
                list = None;
            } else {
                let item_indent = *item_indent.get_or_insert(indent);
                let mut field = None;

                if is_item && indent == item_indent {
                    if let Some(found) = item.take().and_then(|i| matches(i, container)) {
                        return Some(found);
                    }
                    item = Some(Item::default());
                    let rest = trimmed[1..].trim_start();
                    field = Some((line_start + content.len() - rest.len(), rest));
                } else if indent == item_indent + 2 {
                    field = Some((line_start + indent, trimmed));
                }

                if let (Some(item), Some((start, field))) = (&mut item, field) {
                    if let Some(value) = field.strip_prefix("name:") {
                        item.name = Some(unquote(strip_comment(value).trim()).to_string());
                    } else if let Some(value) = field.strip_prefix("image:") {
                        let value_start = start + field.len() - value.len();
                        item.image = Some(value_range(value, value_start));
                    }
                }
                continue;
            }
        }

        let key = strip_comment(trimmed).trim_end();
        if key == "containers:" || key == "initContainers:" {
            list = Some((indent, None));
        }
    }

    item.and_then(|i| matches(i, container))
}

fn matches(item: Item, container: &str) -> Option<Range<usize>> {
    match item.name {
        Some(name) if name == container => item.image,
        _ => None,
    }
}

/// Range of a scalar value, excluding surrounding whitespace, quotes and comments.
fn value_range(value: &str, start: usize) -> Range<usize> {
    let leading = value.len() - value.trim_start().len();
    let value_start = start + leading;
    let value = value.trim_start();

    for quote in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(quote) {
            let end = inner.find(quote).unwrap_or(inner.len());
            return value_start + 1..value_start + 1 + end;
        }
    }

    let value = strip_comment(value).trim_end();
    value_start..value_start + value.len()
}

fn strip_comment(value: &str) -> &str {
    match value.find(" #") {
        Some(pos) => &value[..pos],
        None => value,
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
}
