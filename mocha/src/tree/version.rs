use std::cmp::Ordering;

/// Represents a class file version.
///
/// Use the associated constants (like [`Version::V1_8`]) if you want that version.
///
/// Take a look at [the list of class file versions](https://docs.oracle.com/javase/specs/jvms/se22/html/jvms-4.html#jvms-4.1-200-B.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
	pub(crate) major: u16,
	pub(crate) minor: u16,
}

impl Version {
	#[allow(unused)]
	pub const V1_6: Version = Version::new(50, 0);
	#[allow(unused)]
	pub const V1_7: Version = Version::new(51, 0);
	#[allow(unused)]
	pub const V1_8: Version = Version::new(52, 0);
	#[allow(unused)]
	pub const V9: Version = Version::new(53, 0);
	#[allow(unused)]
	pub const V11: Version = Version::new(55, 0);
	#[allow(unused)]
	pub const V17: Version = Version::new(61, 0);
	#[allow(unused)]
	pub const V21: Version = Version::new(65, 0);
	#[allow(unused)]
	pub const V25: Version = Version::new(69, 0);

	pub const fn new(major: u16, minor: u16) -> Version {
		Version { major, minor }
	}

	pub fn major(self) -> u16 {
		self.major
	}

	/// `true` if the class file format of this version carries a `StackMapTable`
	/// that the verifier enforces (major 51 and up).
	pub(crate) fn requires_stack_map_frames(self) -> bool {
		self.major >= 51
	}
}

impl PartialOrd for Version {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Version {
	fn cmp(&self, other: &Self) -> Ordering {
		self.major.cmp(&other.major)
			.then_with(|| self.minor.cmp(&other.minor))
	}
}

#[cfg(test)]
mod testing {
	use crate::tree::version::Version;

	#[test]
	fn test_cmp() {
		assert!(Version::V1_8 < Version::V9);
		assert!(Version::V17 <= Version::V17);
		assert!(Version::V21 >= Version::V11);

		assert!(Version::V21 < Version::new(65, 1));
		assert!(Version::new(65, 2) > Version::new(65, 1));
	}

	#[test]
	fn test_frames() {
		assert!(!Version::V1_6.requires_stack_map_frames());
		assert!(Version::V1_7.requires_stack_map_frames());
		assert!(Version::V1_8.requires_stack_map_frames());
	}
}
