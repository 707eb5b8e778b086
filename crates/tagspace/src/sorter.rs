//! Deterministic ordering of view items.
//!
//! Ordering is layered. Partitions come first and ignore `reversed`: folders
//! before files when `folders_first` is set, then regular names before
//! dot-names. Inside a partition the key decides, flipped by `reversed`
//! except that items missing the key value always come last. Ties fall back
//! to the folded name and then the path, always ascending.
//!
//! Sort keys are parsed through serde only, as part of `Preferences`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::{Item, TypeGroup};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Name,
    Modified,
    Created,
    Size,
    Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortOptions {
    pub key: SortKey,
    pub reversed: bool,
    pub folders_first: bool,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            key: SortKey::Name,
            reversed: false,
            folders_first: true,
        }
    }
}

struct Decorated {
    folded: String,
    item: Item,
}

/// Sorts `items` according to `options`.
pub fn sort_items(items: Vec<Item>, options: SortOptions) -> Vec<Item> {
    let mut decorated: Vec<Decorated> = items
        .into_iter()
        .map(|item| Decorated {
            folded: item.name.to_lowercase(),
            item,
        })
        .collect();
    decorated.sort_by(|left, right| compare(left, right, options));
    decorated.into_iter().map(|entry| entry.item).collect()
}

fn compare(left: &Decorated, right: &Decorated, options: SortOptions) -> Ordering {
    let (a, b) = (&left.item, &right.item);

    if options.folders_first {
        let partition = b.is_dir().cmp(&a.is_dir());
        if partition != Ordering::Equal {
            return partition;
        }
    }
    let hidden = a.is_hidden().cmp(&b.is_hidden());
    if hidden != Ordering::Equal {
        return hidden;
    }

    compare_key(left, right, options.key, options.reversed)
        .then_with(|| left.folded.cmp(&right.folded))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.path.cmp(&b.path))
}

fn compare_key(left: &Decorated, right: &Decorated, key: SortKey, reversed: bool) -> Ordering {
    let (a, b) = (&left.item, &right.item);
    let flip = |ordering: Ordering| if reversed { ordering.reverse() } else { ordering };
    match key {
        SortKey::Name => flip(left.folded.cmp(&right.folded)),
        // Newest and largest first.
        SortKey::Modified => present_first(a.modified_at, b.modified_at, |x, y| flip(y.cmp(x))),
        SortKey::Created => present_first(a.created_at, b.created_at, |x, y| flip(y.cmp(x))),
        SortKey::Size => present_first(a.size, b.size, |x, y| flip(y.cmp(x))),
        SortKey::Type => flip(TypeGroup::of(a).cmp(&TypeGroup::of(b))).then_with(|| {
            present_first(a.extension.as_ref(), b.extension.as_ref(), |x, y| flip(x.cmp(y)))
        }),
    }
}

/// Orders present values with `cmp` and puts missing values after them,
/// whatever the direction of `cmp`.
fn present_first<T>(a: Option<T>, b: Option<T>, cmp: impl Fn(&T, &T) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => cmp(&a, &b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
