use rand::Rng;

/// Random identifier of the form `{prefix}_{16 hex chars}`.
pub fn random_id(prefix: &str) -> String {
	let mut bytes = [0u8; 8];
	rand::rng().fill(&mut bytes);
	format!("{}_{}", prefix, hex::encode(bytes))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ids_are_prefixed_and_distinct() {
		let a = random_id("rec");
		let b = random_id("rec");
		assert!(a.starts_with("rec_"));
		assert_eq!(a.len(), "rec_".len() + 16);
		assert_ne!(a, b);
	}
}
