//! `add_extra_ppas` — spec §4.E step 4: write each PPA's `sources.list.d`
//! entry, resolve its signing-key fingerprint if the manifest didn't pin one,
//! and trust that key before the rootfs's package steps run.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tracing::info;

use crate::engine::Context;
use crate::error::KilnError;
use crate::tools::gpg;
use crate::tools::http::{CliHttpGetter, HttpGetter};

/// # Errors
/// Propagates tool-failure, I/O, and fingerprint-lookup errors.
pub fn add_extra_ppas(ctx: &mut Context) -> Result<()> {
	let chroot = ctx.workspace.sub_dir("chroot")?;
	let Some(customization) = ctx.image.customization.clone() else { return Ok(()) };
	let getter = CliHttpGetter { runner: &ctx.runner };

	for ppa in &customization.extra_ppas {
		let Some((user, name)) = ppa.user_and_ppa() else {
			return Err(eyre!(KilnError::DomainRule {
				field: format!("customization.extra-ppas[{}]", ppa.name),
				reason: "PPA name must match the pattern `user/ppa`".to_owned(),
			}));
		};

		write_sources_entry(&chroot, user, name, &ctx.image.series, ppa.auth.as_deref())?;

		let fingerprint = match &ppa.fingerprint {
			Some(fp) => fp.clone(),
			None => lookup_fingerprint(&getter, user, name)?,
		};
		gpg::trust_key(&ctx.runner, &chroot, user, name, &fingerprint)?;

		info!(ppa = %ppa.name, "added PPA");
	}
	Ok(())
}

/// `chroot/etc/apt/sources.list.d/<user>-ubuntu-<ppa>-<series>.list`
/// containing a single `deb https://[auth@]…launchpadcontent.net/<user>/<ppa>/ubuntu SERIES main`
/// line; a private PPA (`auth` set) is served from `private-ppa.launchpadcontent.net`
/// with the credentials embedded in the URL.
fn write_sources_entry(chroot: &std::path::Path, user: &str, ppa: &str, series: &str, auth: Option<&str>) -> Result<()> {
	let host = if auth.is_some() { "private-ppa.launchpadcontent.net" } else { "ppa.launchpadcontent.net" };
	let userinfo = auth.map_or_else(String::new, |auth| format!("{auth}@"));
	let url = format!("https://{userinfo}{host}/{user}/{ppa}/ubuntu");
	let line = format!("deb {url} {series} main\n");

	let dir = chroot.join("etc/apt/sources.list.d");
	std::fs::create_dir_all(&dir).map_err(|source| KilnError::WorkspaceIo { path: dir.clone(), source })?;
	let path = dir.join(format!("{user}-ubuntu-{ppa}-{series}.list"));
	std::fs::write(&path, line).map_err(|source| KilnError::WorkspaceIo { path, source })
}

/// `GET https://api.launchpad.net/devel/~<user>/+archive/ubuntu/<ppa>` and
/// read `signing_key_fingerprint` (spec §4.E step 4).
fn lookup_fingerprint(getter: &impl HttpGetter, user: &str, ppa: &str) -> Result<String> {
	let url = format!("https://api.launchpad.net/devel/~{user}/+archive/ubuntu/{ppa}");
	let body = getter.get(&url)?;
	let json: Value = serde_json::from_str(&body)
		.map_err(|source| KilnError::SchemaError(format!("{url}: {source}")))?;
	json.get("signing_key_fingerprint")
		.and_then(Value::as_str)
		.map(str::to_owned)
		.ok_or_else(|| eyre!(KilnError::ContentMissing(format!("signing_key_fingerprint in {url}"))))
}

#[cfg(test)]
mod tests {
	use super::*;

	struct FakeGetter(String);
	impl HttpGetter for FakeGetter {
		fn get(&self, _url: &str) -> Result<String> {
			Ok(self.0.clone())
		}
	}

	#[test]
	fn lookup_fingerprint_reads_the_documented_field() {
		let getter = FakeGetter(r#"{"signing_key_fingerprint": "ABCD1234"}"#.to_owned());
		assert_eq!(lookup_fingerprint(&getter, "someuser", "someppa").unwrap(), "ABCD1234");
	}

	#[test]
	fn lookup_fingerprint_rejects_a_response_missing_the_field() {
		let getter = FakeGetter("{}".to_owned());
		assert!(lookup_fingerprint(&getter, "someuser", "someppa").is_err());
	}

	#[test]
	fn write_sources_entry_uses_private_host_only_when_auth_is_set() {
		let tmp = tempfile::tempdir().unwrap();
		write_sources_entry(tmp.path(), "someuser", "someppa", "jammy", None).unwrap();
		let text = std::fs::read_to_string(tmp.path().join("etc/apt/sources.list.d/someuser-ubuntu-someppa-jammy.list")).unwrap();
		assert_eq!(text, "deb https://ppa.launchpadcontent.net/someuser/someppa/ubuntu jammy main\n");
	}

	#[test]
	fn write_sources_entry_embeds_auth_for_a_private_ppa() {
		let tmp = tempfile::tempdir().unwrap();
		write_sources_entry(tmp.path(), "someuser", "someppa", "jammy", Some("token")).unwrap();
		let text = std::fs::read_to_string(tmp.path().join("etc/apt/sources.list.d/someuser-ubuntu-someppa-jammy.list")).unwrap();
		assert_eq!(text, "deb https://token@private-ppa.launchpadcontent.net/someuser/someppa/ubuntu jammy main\n");
	}
}
