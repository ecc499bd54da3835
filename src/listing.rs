use std::collections::BTreeSet;

use crate::models::ObjectAttrs;

/// Listing inputs shared by the JSON and XML surfaces. The XML surface's
/// `start-after` maps to `start_offset` with `start_exclusive` set.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: String,
    pub delimiter: String,
    pub versions: bool,
    pub start_offset: String,
    pub end_offset: String,
    pub include_trailing_delimiter: bool,
    pub max_results: i64,
    pub start_exclusive: bool,
    pub page_token: String,
}

#[derive(Debug, Default)]
pub struct ListResult {
    pub objects: Vec<ObjectAttrs>,
    pub prefixes: Vec<String>,
    pub next_page_token: String,
}

/// Applies prefix/delimiter/offset filtering and pagination to a bucket's
/// objects. `objects` is whatever the backend returned for the bucket
/// (current only, or all generations when listing versions).
pub fn filter_objects(mut objects: Vec<ObjectAttrs>, opts: &ListOptions) -> ListResult {
    objects.sort_by(|a, b| a.name.cmp(&b.name).then(a.generation.cmp(&b.generation)));

    // pageToken supersedes startOffset when both are present.
    let (offset, offset_exclusive) = if !opts.page_token.is_empty() {
        (opts.page_token.as_str(), false)
    } else {
        (opts.start_offset.as_str(), opts.start_exclusive)
    };

    let in_offset_window = |key: &str| -> bool {
        if !opts.end_offset.is_empty() && key >= opts.end_offset.as_str() {
            return false;
        }
        if !offset.is_empty() {
            if key < offset {
                return false;
            }
            if offset_exclusive && key == offset {
                return false;
            }
        }
        true
    };

    let mut leaves: Vec<ObjectAttrs> = Vec::new();
    let mut prefixes: BTreeSet<String> = BTreeSet::new();

    for obj in objects {
        if !obj.name.starts_with(&opts.prefix) {
            continue;
        }
        let tail = &obj.name[opts.prefix.len()..];

        let common_prefix = if !opts.delimiter.is_empty() {
            tail.find(&opts.delimiter)
                .map(|p| obj.name[..opts.prefix.len() + p + opts.delimiter.len()].to_string())
        } else {
            None
        };

        match common_prefix {
            Some(cp) => {
                let emit_as_object = opts.include_trailing_delimiter && obj.name == cp;
                if in_offset_window(&cp) {
                    prefixes.insert(cp);
                    if emit_as_object {
                        leaves.push(obj);
                    }
                }
            }
            None => {
                if in_offset_window(&obj.name) {
                    leaves.push(obj);
                }
            }
        }
    }

    let mut next_page_token = String::new();
    if opts.max_results > 0 && leaves.len() > opts.max_results as usize {
        next_page_token = leaves[opts.max_results as usize].name.clone();
        leaves.truncate(opts.max_results as usize);
    }

    ListResult {
        objects: leaves,
        prefixes: prefixes.into_iter().collect(),
        next_page_token,
    }
}
