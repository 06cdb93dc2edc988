//! Sidebar entries of the protected section, filtered by the session user.

use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavItem {
    pub path: &'static str,
    pub label: &'static str,
    /// Only shown to admins.
    pub admin_only: bool,
    pub children: &'static [NavItem],
}

impl NavItem {
    const fn link(path: &'static str, label: &'static str) -> Self {
        Self {
            path,
            label,
            admin_only: false,
            children: &[],
        }
    }

    const fn admin_link(path: &'static str, label: &'static str) -> Self {
        Self {
            path,
            label,
            admin_only: true,
            children: &[],
        }
    }

    pub fn is_group(&self) -> bool {
        !self.children.is_empty()
    }

    /// Whether `path` is this entry or lives under one of its children.
    pub fn contains_path(&self, path: &str) -> bool {
        if self.is_group() {
            self.children.iter().any(|c| path.starts_with(c.path))
        } else {
            path == self.path
        }
    }
}

/// The dashboard menu in display order.
pub const MENU: &[NavItem] = &[
    NavItem::link("/admin", "Dashboard"),
    NavItem {
        path: "/admin/content",
        label: "Content",
        admin_only: false,
        children: &[
            NavItem::link("/admin/content", "Content items"),
            NavItem::link("/admin/categories", "Categories"),
        ],
    },
    NavItem::link("/admin/gallery", "Gallery"),
    NavItem::admin_link("/admin/messages", "Messages"),
    NavItem::link("/admin/audit", "Audit log"),
    NavItem::admin_link("/admin/users", "Users"),
    NavItem::link("/admin/settings", "Settings"),
];

/// Entries the session may see. Empty unless authenticated.
pub fn visible_items(session: &Session) -> Vec<&'static NavItem> {
    if !session.is_authenticated() {
        return Vec::new();
    }
    let is_admin = session.is_admin();
    MENU.iter()
        .filter(|item| !item.admin_only || is_admin)
        .collect()
}

/// The group that should start expanded for the current location, if any.
pub fn expanded_group<'a>(items: &[&'a NavItem], current_path: &str) -> Option<&'a NavItem> {
    items
        .iter()
        .copied()
        .find(|item| item.is_group() && item.contains_path(current_path))
}
