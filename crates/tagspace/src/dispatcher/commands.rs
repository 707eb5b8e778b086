//! Requests from the facade to the dispatcher loop.

use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender};

use crate::category::{Category, CategorySet};
use crate::error::Result;
use crate::filter::FilterOptions;
use crate::index::{ViewChange, ViewId};
use crate::sorter::SortOptions;

pub(crate) type Reply<T> = Sender<Result<T>>;

pub(crate) enum Command {
    OpenView {
        filter: CategorySet,
        reply: Reply<(ViewId, Receiver<ViewChange>)>,
    },
    CloseView {
        view: ViewId,
        reply: Reply<()>,
    },
    SetFilter {
        view: ViewId,
        options: FilterOptions,
        reply: Reply<()>,
    },
    SetSort {
        view: ViewId,
        options: SortOptions,
        reply: Reply<()>,
    },
    RefreshView {
        view: ViewId,
        reply: Reply<()>,
    },
    AddCategory {
        name: String,
        reply: Reply<bool>,
    },
    RemoveCategory {
        name: String,
        reply: Reply<()>,
    },
    RenameCategory {
        old: String,
        new: String,
        reply: Reply<Vec<PathBuf>>,
    },
    MoveCategory {
        name: String,
        up: bool,
        reply: Reply<bool>,
    },
    SubscribeCategories {
        reply: Reply<Receiver<Vec<Category>>>,
    },
    EnsureLocation {
        set: CategorySet,
        reply: Reply<PathBuf>,
    },
    MoveItem {
        path: PathBuf,
        set: CategorySet,
        reply: Reply<PathBuf>,
    },
    /// Answered once no events are pending and no walk is in flight.
    Flush {
        reply: Reply<()>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenView { .. } => "open_view",
            Self::CloseView { .. } => "close_view",
            Self::SetFilter { .. } => "set_filter",
            Self::SetSort { .. } => "set_sort",
            Self::RefreshView { .. } => "refresh_view",
            Self::AddCategory { .. } => "add_category",
            Self::RemoveCategory { .. } => "remove_category",
            Self::RenameCategory { .. } => "rename_category",
            Self::MoveCategory { .. } => "move_category",
            Self::SubscribeCategories { .. } => "subscribe_categories",
            Self::EnsureLocation { .. } => "ensure_location",
            Self::MoveItem { .. } => "move_item",
            Self::Flush { .. } => "flush",
        }
    }
}
