//! Component F's LIFO release-stack (spec §5): loop-device attaches and
//! mounts must be torn down in exactly reverse acquisition order, even when
//! a later step in the same sequence fails. This has no direct teacher
//! ancestor — the teacher's `PartitionLayout::unmount_from_chroot` undoes a
//! fixed, hand-ordered bind-mount list; here we generalize that into a
//! dynamic stack so `make_disk`/`update_grub` can acquire a variable number
//! of loop devices and mounts and still guarantee reverse-order release.

use color_eyre::Result;
use tracing::{error, warn};

/// A stack of teardown actions, released last-acquired-first.
///
/// Every action runs even if an earlier one fails; failures are logged and
/// the first one encountered is returned once the whole stack has been
/// drained, so a caller sees "something failed to release" without masking
/// the other releases that still needed to happen.
#[derive(Default)]
pub struct ReleaseStack {
	actions: Vec<(&'static str, Box<dyn FnOnce() -> Result<()>>)>,
}

impl ReleaseStack {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, label: &'static str, action: impl FnOnce() -> Result<()> + 'static) {
		self.actions.push((label, Box::new(action)));
	}

	/// Release everything acquired so far, most-recent-first.
	///
	/// # Errors
	/// The first failure encountered, after every action has still been
	/// attempted.
	pub fn release_all(&mut self) -> Result<()> {
		let mut first_err = None;
		while let Some((label, action)) = self.actions.pop() {
			if let Err(e) = action() {
				error!(label, error = %e, "release action failed");
				first_err.get_or_insert(e);
			}
		}
		match first_err {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}
}

impl Drop for ReleaseStack {
	fn drop(&mut self) {
		if !self.actions.is_empty() {
			warn!(remaining = self.actions.len(), "ReleaseStack dropped with unreleased actions");
			let _ = self.release_all();
		}
	}
}

#[cfg(test)]
mod tests {
	use std::cell::RefCell;
	use std::rc::Rc;

	use super::*;

	#[test]
	fn releases_in_reverse_order() {
		let order = Rc::new(RefCell::new(Vec::new()));
		let mut stack = ReleaseStack::new();
		for label in ["attach", "mount", "bind"] {
			let order = Rc::clone(&order);
			stack.push(label, move || {
				order.borrow_mut().push(label);
				Ok(())
			});
		}
		stack.release_all().unwrap();
		assert_eq!(*order.borrow(), vec!["bind", "mount", "attach"]);
	}

	#[test]
	fn continues_releasing_after_a_failure() {
		let order = Rc::new(RefCell::new(Vec::new()));
		let mut stack = ReleaseStack::new();
		stack.push("first", {
			let order = Rc::clone(&order);
			move || {
				order.borrow_mut().push("first");
				Ok(())
			}
		});
		stack.push("second", {
			let order = Rc::clone(&order);
			move || {
				order.borrow_mut().push("second");
				Err(color_eyre::eyre::eyre!("boom"))
			}
		});
		let result = stack.release_all();
		assert!(result.is_err());
		assert_eq!(*order.borrow(), vec!["second", "first"]);
	}
}
