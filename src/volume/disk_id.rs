//! Disk-ID generation by rejection sampling (spec §4.F `make_disk`:
//! "generate a random 32-bit disk ID, resampling on collision with any ID
//! already assigned to a volume in this run").

use std::collections::HashSet;

use color_eyre::{eyre::eyre, Result};
use rand::RngCore;

use crate::error::KilnError;

const MAX_ATTEMPTS: u32 = 10;

/// Sample a non-zero `u32` not already present in `excluded`.
///
/// # Errors
/// [`KilnError::RandomnessExhausted`] if `MAX_ATTEMPTS` resamples all
/// collide — in practice only reachable when `excluded` is enormous.
pub fn generate<R: RngCore>(rng: &mut R, excluded: &HashSet<u32>) -> Result<u32> {
	for attempt in 1..=MAX_ATTEMPTS {
		let candidate = rng.next_u32();
		if candidate != 0 && !excluded.contains(&candidate) {
			return Ok(candidate);
		}
		let _ = attempt;
	}
	Err(eyre!(KilnError::RandomnessExhausted { attempts: MAX_ATTEMPTS }))
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Scripted(Vec<u32>);
	impl RngCore for Scripted {
		fn next_u32(&mut self) -> u32 {
			self.0.remove(0)
		}
		fn next_u64(&mut self) -> u64 {
			u64::from(self.next_u32())
		}
		fn fill_bytes(&mut self, dest: &mut [u8]) {
			dest.fill(0);
		}
		fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
			self.fill_bytes(dest);
			Ok(())
		}
	}

	#[test]
	fn resamples_past_a_collision() {
		let mut rng = Scripted(vec![5, 5, 7]);
		let mut excluded = HashSet::new();
		excluded.insert(5);
		let id = generate(&mut rng, &excluded).unwrap();
		assert_eq!(id, 7);
	}

	#[test]
	fn rejects_zero() {
		let mut rng = Scripted(vec![0, 9]);
		let id = generate(&mut rng, &HashSet::new()).unwrap();
		assert_eq!(id, 9);
	}

	#[test]
	fn exhaustion_is_reported() {
		let mut rng = Scripted(vec![3; 10]);
		let mut excluded = HashSet::new();
		excluded.insert(3);
		assert!(generate(&mut rng, &excluded).is_err());
	}
}
