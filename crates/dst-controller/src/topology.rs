//! Network topology: directed allow/deny rules over process names.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct NetworkTopology {
    incoming_dropped: HashSet<String>,
    disabled_links: HashSet<(String, String)>,
}

impl NetworkTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drop_incoming(&mut self, process: &str) {
        self.incoming_dropped.insert(process.to_string());
    }

    pub fn allow_incoming(&mut self, process: &str) {
        self.incoming_dropped.remove(process);
    }

    pub fn is_incoming_dropped(&self, process: &str) -> bool {
        self.incoming_dropped.contains(process)
    }

    pub fn disable_link(&mut self, src: &str, dst: &str) {
        self.disabled_links
            .insert((src.to_string(), dst.to_string()));
    }

    pub fn enable_link(&mut self, src: &str, dst: &str) {
        self.disabled_links
            .remove(&(src.to_string(), dst.to_string()));
    }

    pub fn is_link_disabled(&self, src: &str, dst: &str) -> bool {
        self.disabled_links
            .contains(&(src.to_string(), dst.to_string()))
    }

    /// A message is denied if the recipient has dropped all incoming
    /// traffic, or the (sender, recipient) link is specifically disabled.
    pub fn is_denied(&self, sender: &str, recipient: &str) -> bool {
        self.is_incoming_dropped(recipient) || self.is_link_disabled(sender, recipient)
    }

    /// Installs every cross-group ordered pair (both directions) into
    /// `disabled_links`, modeling a full network partition between the
    /// two process groups.
    pub fn partition(&mut self, group_a: &[String], group_b: &[String]) {
        for a in group_a {
            for b in group_b {
                self.disable_link(a, b);
                self.disable_link(b, a);
            }
        }
    }

    pub fn reset(&mut self) {
        self.incoming_dropped.clear();
        self.disabled_links.clear();
    }
}
