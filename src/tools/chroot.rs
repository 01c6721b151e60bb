//! Chroot execution facade — grounded in the teacher's `Script::execute`/
//! `Auth::add_to_chroot` (`cfg/script.rs`, `cfg/auth.rs`), both of which run
//! work inside a target root via `tiffin::Container`. This generalizes that
//! one-off usage into a reusable "run this inside that root" helper used by
//! manual customization, `update-grub`, and cloud-init seeding.

use std::cell::RefCell;
use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tiffin::Container;

use crate::error::KilnError;

/// Run `f` with the working root bind-mounted and chrooted into `root`,
/// tearing the container back down on the way out regardless of `f`'s
/// outcome (mirrors [`tiffin::Container::run`]'s own teardown guarantee, the
/// same entry point the teacher's `Script::execute`/`Auth::add_to_chroot`
/// use).
///
/// # Errors
/// Whatever `f` itself returns, or [`KilnError::ToolFailure`] if entering or
/// leaving the chroot fails.
pub fn run_in<F>(root: &Path, f: F) -> Result<()>
where
	F: FnOnce() -> Result<()>,
{
	let mut container = Container::new(root.to_path_buf());
	let outcome: RefCell<Option<Result<()>>> = RefCell::new(None);
	container.run(|| {
		*outcome.borrow_mut() = Some(f());
		Ok(())
	})
	.map_err(|e: std::io::Error| eyre!(KilnError::ToolFailure {
		cmd: format!("chroot {}", root.display()),
		output: e.to_string(),
		exit: None,
	}))?;
	outcome.into_inner().unwrap_or(Ok(()))
}
