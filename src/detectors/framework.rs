//! detectors/framework.rs
//!
//! Test framework detection based on the checked-out tree.

use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestFramework {
    Maven,
    Gradle { wrapper: bool },
    CargoTest,
    Pytest,
    GoTest,
    Npm,
    None,
}

/* ============================================================
   Public API
   ============================================================ */

pub fn detect_framework(root: &Path) -> TestFramework {
    // JVM builds first; those are the common case for merge corpora
    if exists(root, "pom.xml") {
        return TestFramework::Maven;
    }

    if exists(root, "build.gradle") || exists(root, "build.gradle.kts") {
        return TestFramework::Gradle {
            wrapper: exists(root, "gradlew"),
        };
    }

    if exists(root, "Cargo.toml") {
        return TestFramework::CargoTest;
    }

    if exists(root, "pytest.ini")
        || exists(root, "conftest.py")
        || exists(root, "pyproject.toml")
        || exists(root, "setup.py")
    {
        return TestFramework::Pytest;
    }

    if exists(root, "go.mod") {
        return TestFramework::GoTest;
    }

    if exists(root, "package.json") && package_has_test_script(root) {
        return TestFramework::Npm;
    }

    TestFramework::None
}

impl TestFramework {
    /// Shell command that runs the whole suite, `None` when nothing was detected.
    pub fn command(self) -> Option<&'static str> {
        match self {
            TestFramework::Maven => Some("mvn -B -q test"),
            TestFramework::Gradle { wrapper: true } => Some("./gradlew test --console=plain"),
            TestFramework::Gradle { wrapper: false } => Some("gradle test --console=plain"),
            TestFramework::CargoTest => Some("cargo test --color never"),
            TestFramework::Pytest => Some("pytest -q"),
            TestFramework::GoTest => Some("go test ./..."),
            TestFramework::Npm => Some("npm test"),
            TestFramework::None => None,
        }
    }
}

/* ============================================================
   Helpers
   ============================================================ */

#[inline]
fn exists(root: &Path, file: &str) -> bool {
    root.join(file).exists()
}

fn package_has_test_script(root: &Path) -> bool {
    let pkg = root.join("package.json");
    let Ok(contents) = std::fs::read_to_string(pkg) else {
        return false;
    };

    contents.contains("\"test\"")
}
