use std::collections::HashMap;
use std::sync::LazyLock;

use crate::models::{LicenseRef, UNKNOWN_LICENSE};

const SPDX_BASE_URL: &str = "https://spdx.org/licenses/";

/// Canonical identifiers this tool recognizes, with their human-readable names.
const KNOWN_LICENSES: &[(&str, &str)] = &[
    ("MIT", "MIT License"),
    ("MIT-0", "MIT No Attribution"),
    ("Apache-2.0", "Apache License 2.0"),
    ("Apache-1.1", "Apache License 1.1"),
    ("BSD-2-Clause", "BSD 2-Clause \"Simplified\" License"),
    ("BSD-3-Clause", "BSD 3-Clause \"New\" or \"Revised\" License"),
    ("BSD-4-Clause", "BSD 4-Clause \"Original\" or \"Old\" License"),
    ("0BSD", "BSD Zero Clause License"),
    ("ISC", "ISC License"),
    ("Unlicense", "The Unlicense"),
    ("Zlib", "zlib License"),
    ("CC0-1.0", "Creative Commons Zero v1.0 Universal"),
    ("CC-BY-3.0", "Creative Commons Attribution 3.0 Unported"),
    ("CC-BY-4.0", "Creative Commons Attribution 4.0 International"),
    ("WTFPL", "Do What The F*ck You Want To Public License"),
    ("PSF-2.0", "Python Software Foundation License 2.0"),
    ("Python-2.0", "Python License 2.0"),
    ("BlueOak-1.0.0", "Blue Oak Model License 1.0.0"),
    ("Artistic-2.0", "Artistic License 2.0"),
    ("BSL-1.0", "Boost Software License 1.0"),
    ("HPND", "Historical Permission Notice and Disclaimer"),
    ("LGPL-2.0", "GNU Library General Public License v2"),
    ("LGPL-2.0-only", "GNU Library General Public License v2 only"),
    ("LGPL-2.0-or-later", "GNU Library General Public License v2 or later"),
    ("LGPL-2.1", "GNU Lesser General Public License v2.1"),
    ("LGPL-2.1-only", "GNU Lesser General Public License v2.1 only"),
    ("LGPL-2.1-or-later", "GNU Lesser General Public License v2.1 or later"),
    ("LGPL-3.0", "GNU Lesser General Public License v3.0"),
    ("LGPL-3.0-only", "GNU Lesser General Public License v3.0 only"),
    ("LGPL-3.0-or-later", "GNU Lesser General Public License v3.0 or later"),
    ("MPL-1.1", "Mozilla Public License 1.1"),
    ("MPL-2.0", "Mozilla Public License 2.0"),
    ("EPL-1.0", "Eclipse Public License 1.0"),
    ("EPL-2.0", "Eclipse Public License 2.0"),
    ("EUPL-1.1", "European Union Public License 1.1"),
    ("EUPL-1.2", "European Union Public License 1.2"),
    ("CDDL-1.0", "Common Development and Distribution License 1.0"),
    ("APSL-2.0", "Apple Public Source License 2.0"),
    ("OSL-3.0", "Open Software License 3.0"),
    ("GPL-2.0", "GNU General Public License v2.0"),
    ("GPL-2.0-only", "GNU General Public License v2.0 only"),
    ("GPL-2.0-or-later", "GNU General Public License v2.0 or later"),
    ("GPL-3.0", "GNU General Public License v3.0"),
    ("GPL-3.0-only", "GNU General Public License v3.0 only"),
    ("GPL-3.0-or-later", "GNU General Public License v3.0 or later"),
    ("AGPL-3.0", "GNU Affero General Public License v3.0"),
    ("AGPL-3.0-only", "GNU Affero General Public License v3.0 only"),
    ("AGPL-3.0-or-later", "GNU Affero General Public License v3.0 or later"),
];

/// Common free-text spellings, keyed by their [`fold`]ed form.
const VARIANTS: &[(&str, &str)] = &[
    ("apache 2", "Apache-2.0"),
    ("apache 2.0", "Apache-2.0"),
    ("apache-2", "Apache-2.0"),
    ("apache license 2.0", "Apache-2.0"),
    ("apache license, version 2.0", "Apache-2.0"),
    ("apache license version 2.0", "Apache-2.0"),
    ("apache software license", "Apache-2.0"),
    ("apache software license 2.0", "Apache-2.0"),
    ("asl 2.0", "Apache-2.0"),
    ("mit license", "MIT"),
    ("the mit license", "MIT"),
    ("the mit license (mit)", "MIT"),
    ("expat", "MIT"),
    ("bsd", "BSD-3-Clause"),
    ("bsd license", "BSD-3-Clause"),
    ("new bsd", "BSD-3-Clause"),
    ("new bsd license", "BSD-3-Clause"),
    ("modified bsd", "BSD-3-Clause"),
    ("bsd 3-clause", "BSD-3-Clause"),
    ("bsd 3-clause license", "BSD-3-Clause"),
    ("3-clause bsd", "BSD-3-Clause"),
    ("bsd-3", "BSD-3-Clause"),
    ("bsd 2-clause", "BSD-2-Clause"),
    ("bsd 2-clause license", "BSD-2-Clause"),
    ("simplified bsd", "BSD-2-Clause"),
    ("freebsd", "BSD-2-Clause"),
    ("gnu gpl v2", "GPL-2.0"),
    ("gnu general public license v2", "GPL-2.0"),
    ("gnu general public license v2 (gplv2)", "GPL-2.0"),
    ("gpl v2", "GPL-2.0"),
    ("gplv2", "GPL-2.0"),
    ("gnu gpl v3", "GPL-3.0"),
    ("gnu general public license v3", "GPL-3.0"),
    ("gnu general public license v3 (gplv3)", "GPL-3.0"),
    ("gpl v3", "GPL-3.0"),
    ("gplv3", "GPL-3.0"),
    ("gnu general public license v3 or later (gplv3+)", "GPL-3.0-or-later"),
    ("gplv3+", "GPL-3.0-or-later"),
    ("gnu lgpl v2.1", "LGPL-2.1"),
    ("lgpl v2.1", "LGPL-2.1"),
    ("lgplv2.1", "LGPL-2.1"),
    ("gnu lesser general public license v2 (lgplv2)", "LGPL-2.0"),
    ("gnu lgpl v3", "LGPL-3.0"),
    ("lgpl v3", "LGPL-3.0"),
    ("lgplv3", "LGPL-3.0"),
    ("gnu lesser general public license v3", "LGPL-3.0"),
    ("gnu lesser general public license v3 (lgplv3)", "LGPL-3.0"),
    ("gnu library or lesser general public license (lgpl)", "LGPL-2.0-or-later"),
    ("agpl v3", "AGPL-3.0"),
    ("agplv3", "AGPL-3.0"),
    ("gnu agpl v3", "AGPL-3.0"),
    ("gnu affero general public license v3", "AGPL-3.0"),
    ("mozilla public license 2.0", "MPL-2.0"),
    ("mozilla public license 2.0 (mpl 2.0)", "MPL-2.0"),
    ("mpl 2.0", "MPL-2.0"),
    ("mplv2", "MPL-2.0"),
    ("mozilla public license 1.1 (mpl 1.1)", "MPL-1.1"),
    ("eclipse public license 2.0", "EPL-2.0"),
    ("eclipse public license 2.0 (epl-2.0)", "EPL-2.0"),
    ("isc license", "ISC"),
    ("isc license (iscl)", "ISC"),
    ("cc0", "CC0-1.0"),
    ("cc0 1.0 universal (cc0 1.0) public domain dedication", "CC0-1.0"),
    ("public domain", "CC0-1.0"),
    ("the unlicense (unlicense)", "Unlicense"),
    ("python software foundation license", "PSF-2.0"),
    ("psf", "PSF-2.0"),
    ("psf license", "PSF-2.0"),
    ("boost software license 1.0 (bsl-1.0)", "BSL-1.0"),
    ("zlib/libpng license", "Zlib"),
    ("historical permission notice and disclaimer (hpnd)", "HPND"),
];

/// License exceptions that may follow `WITH`.
const KNOWN_EXCEPTIONS: &[&str] = &[
    "Classpath-exception-2.0",
    "GCC-exception-2.0",
    "GCC-exception-3.1",
    "LLVM-exception",
    "Autoconf-exception-2.0",
    "Autoconf-exception-3.0",
    "Bison-exception-2.2",
    "Font-exception-2.0",
    "OpenSSL-exception",
    "Qt-LGPL-exception-1.1",
    "Qt-GPL-exception-1.0",
    "WxWindows-exception-3.1",
    "Linux-syscall-note",
    "LGPL-3.0-linking-exception",
    "freertos-exception-2.0",
    "eCos-exception-2.0",
    "u-boot-exception-2.0",
    "389-exception",
];

static KNOWN_BY_FOLDED: LazyLock<HashMap<String, &'static str>> = LazyLock::new(|| {
    KNOWN_LICENSES
        .iter()
        .map(|(id, _)| (id.to_ascii_lowercase(), *id))
        .collect()
});

static EXCEPTIONS_BY_FOLDED: LazyLock<HashMap<String, &'static str>> = LazyLock::new(|| {
    KNOWN_EXCEPTIONS
        .iter()
        .map(|id| (id.to_ascii_lowercase(), *id))
        .collect()
});

static VARIANTS_BY_FOLDED: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| VARIANTS.iter().copied().collect());

/// Lowercase, collapse whitespace, and drop trailing punctuation.
pub fn fold(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', ';', ','])
        .to_lowercase()
}

/// Match an exact identifier, case-insensitively.
pub fn known_id(raw: &str) -> Option<&'static str> {
    KNOWN_BY_FOLDED.get(&fold(raw)).copied()
}

/// Match a `WITH` exception identifier, case-insensitively.
pub fn exception_id(raw: &str) -> Option<&'static str> {
    EXCEPTIONS_BY_FOLDED.get(&fold(raw)).copied()
}

/// Map a single license name or identifier to its canonical identifier.
///
/// Tries the identifier table, then the variant table, then both again with
/// a leading "The" and trailing "License" stripped.
pub fn lookup(raw: &str) -> Option<&'static str> {
    let folded = fold(raw);
    if folded.is_empty() {
        return None;
    }
    if let Some(id) = known_id(&folded) {
        return Some(id);
    }
    if let Some(id) = VARIANTS_BY_FOLDED.get(folded.as_str()) {
        return Some(*id);
    }

    let stripped = folded
        .strip_prefix("the ")
        .unwrap_or(&folded)
        .trim_end_matches(" license")
        .trim();
    if stripped.len() == folded.len() {
        return None;
    }
    KNOWN_BY_FOLDED
        .get(stripped)
        .or_else(|| VARIANTS_BY_FOLDED.get(stripped))
        .copied()
}

/// Human-readable name for a canonical identifier.
pub fn license_name(id: &str) -> String {
    let base = base_id(id);
    if base == UNKNOWN_LICENSE {
        return "Unknown license".to_string();
    }
    let name = KNOWN_LICENSES
        .iter()
        .find(|(known, _)| *known == base)
        .map_or(base, |(_, name)| *name);
    match exception(id) {
        Some(exc) => format!("{name} with {exc}"),
        None => name.to_string(),
    }
}

/// Generic documentation page for an identifier.
///
/// `WITH` expressions link to their base license; `UNKNOWN` links to the
/// license list itself.
pub fn reference_url(id: &str) -> String {
    let base = base_id(id);
    if base == UNKNOWN_LICENSE || base.is_empty() {
        SPDX_BASE_URL.to_string()
    } else {
        format!("{SPDX_BASE_URL}{base}.html")
    }
}

/// Unverified reference for an identifier.
pub fn generic_reference(id: &str) -> LicenseRef {
    LicenseRef {
        id: id.to_string(),
        name: license_name(id),
        url: reference_url(id),
        verified: false,
    }
}

fn base_id(id: &str) -> &str {
    id.split(" WITH ").next().unwrap_or(id).trim()
}

fn exception(id: &str) -> Option<&str> {
    id.split_once(" WITH ").map(|(_, exc)| exc.trim())
}
