//! Mapping from host architecture to release asset suffix.

/// Suffix used when the host architecture is not recognized.
pub const DEFAULT_ARCH_SUFFIX: &str = "linux-musl-amd64";

const ARCH_TABLE: &[(&[&str], &str)] = &[
    (&["x86_64", "amd64", "x64"], "linux-musl-amd64"),
    (&["aarch64", "arm64", "armv8", "armv8l"], "linux-musl-arm64"),
    (&["armv7", "armv7l", "armhf"], "linux-musleabihf-armv7l"),
    (&["armv6", "armv6l"], "linux-musleabihf-armv6l"),
    (&["armv5", "armv5l", "armv5tel", "armel"], "linux-musleabi-armv5l"),
    (&["i386", "i486", "i586", "i686", "x86"], "linux-musl-386"),
    (&["mips"], "linux-musl-mips"),
    (&["mipsel", "mipsle"], "linux-musl-mipsle"),
    (&["mips64"], "linux-musl-mips64"),
    (&["mips64el", "mips64le"], "linux-musl-mips64le"),
    (&["riscv64"], "linux-musl-riscv64"),
    (&["loongarch64", "loong64"], "linux-musl-loong64"),
    (&["ppc64le"], "linux-musl-ppc64le"),
    (&["s390x"], "linux-musl-s390x"),
];

fn lookup(host_arch: &str) -> Option<&'static str> {
    let normalized = host_arch.trim().to_ascii_lowercase();
    ARCH_TABLE
        .iter()
        .find(|(aliases, _)| aliases.contains(&normalized.as_str()))
        .map(|(_, suffix)| *suffix)
}

/// Map an architecture string (as printed by `uname -m`) to the suffix
/// OpenList uses in its release asset names.
///
/// Unknown architectures map to [`DEFAULT_ARCH_SUFFIX`] instead of failing.
#[must_use]
pub fn map_arch(host_arch: &str) -> &'static str {
    lookup(host_arch).unwrap_or(DEFAULT_ARCH_SUFFIX)
}

#[must_use]
pub fn is_known_arch(host_arch: &str) -> bool {
    lookup(host_arch).is_some()
}

#[cfg(test)]
mod tests {
    use super::{ARCH_TABLE, DEFAULT_ARCH_SUFFIX, is_known_arch, map_arch};

    #[test]
    fn maps_common_router_architectures() {
        assert_eq!(map_arch("x86_64"), "linux-musl-amd64");
        assert_eq!(map_arch("aarch64"), "linux-musl-arm64");
        assert_eq!(map_arch("armv7l"), "linux-musleabihf-armv7l");
        assert_eq!(map_arch("mipsel"), "linux-musl-mipsle");
        assert_eq!(map_arch("i686"), "linux-musl-386");
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(map_arch("  AARCH64\n"), "linux-musl-arm64");
        assert!(is_known_arch(" ArmV7L "));
    }

    #[test]
    fn every_alias_maps_to_a_stable_non_empty_suffix() {
        for (aliases, suffix) in ARCH_TABLE {
            for alias in *aliases {
                assert!(!suffix.is_empty());
                assert_eq!(map_arch(alias), *suffix);
                assert_eq!(map_arch(alias), map_arch(alias));
            }
        }
    }

    #[test]
    fn unknown_architectures_fall_back_to_default() {
        for arch in ["", "sparc64", "unknown", "x86_65", "ARMv9-custom"] {
            assert_eq!(map_arch(arch), DEFAULT_ARCH_SUFFIX);
            assert!(!is_known_arch(arch));
        }
    }
}
