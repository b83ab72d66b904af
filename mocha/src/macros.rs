
/// Assuming a `struct Foo(String);`, creates implementations for
/// - `From<String> for Foo`, `From<&str> for Foo`, and
/// - `From<Foo> for String`, and
/// - `.as_str(&self) -> &str`, `.into_string(self) -> String`, and
/// - `AsRef<str> for Foo`.
macro_rules! from_impl_for_string_and_str {
	($name:ident) => {
		impl From<String> for $name {
			fn from(value: String) -> Self {
				$name(value)
			}
		}

		impl From<&str> for $name {
			fn from(value: &str) -> Self {
				$name(value.to_owned())
			}
		}

		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}

		impl $name {
			pub fn as_str(&self) -> &str {
				&self.0
			}

			pub fn into_string(self) -> String {
				self.0
			}
		}

		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				self.as_str()
			}
		}
	}
}

/// Assuming a `struct Foo(String);`, creates implementations for
/// - `PartialEq<&str> for Foo`, `PartialEq<str> for Foo`, and
/// - `PartialEq<Foo> for &str`, `PartialEq<Foo> for str`.
macro_rules! partial_eq_impl_for_str {
	($name:ident) => {
		impl PartialEq<&str> for $name {
			fn eq(&self, other: &&str) -> bool {
				self.0 == *other
			}
		}

		impl PartialEq<str> for $name {
			fn eq(&self, other: &str) -> bool {
				self.0 == other
			}
		}

		impl PartialEq<$name> for &str {
			fn eq(&self, other: &$name) -> bool {
				*self == other.0
			}
		}

		impl PartialEq<$name> for str {
			fn eq(&self, other: &$name) -> bool {
				self == other.0
			}
		}
	}
}

/// Assuming a `struct Foo(String);`, creates a `Display` implementation
/// printing the inner string.
macro_rules! display_impl_for_name {
	($name:ident) => {
		impl std::fmt::Display for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				f.write_str(&self.0)
			}
		}
	}
}

pub(crate) use from_impl_for_string_and_str;
pub(crate) use partial_eq_impl_for_str;
pub(crate) use display_impl_for_name;
