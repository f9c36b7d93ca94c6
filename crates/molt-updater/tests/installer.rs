mod common;

use common::{Fixture, exe_contents};
use molt_platform::Removal;
use molt_updater::{Installer, ProgressReporter, UpdateSource};

#[tokio::test]
async fn install_applies_bundled_then_remote_releases() {
    let fixture = Fixture::new();
    let bundled = fixture.temp.path().join("bundled");
    let remote = fixture.temp.path().join("remote");
    fixture.publish_to(&bundled, "1.0.0");
    fixture.publish_to(&remote, "1.0.0");
    fixture.publish_to(&remote, "1.1.0");

    let installer = Installer::new(fixture.paths.clone(), &bundled, fixture.options())
        .with_remote(UpdateSource::Directory(remote));
    let (progress, mut receiver) = ProgressReporter::channel();

    let executables = installer
        .execute_install(&progress)
        .await
        .expect("install should succeed");

    let version_dir = fixture.paths.version_dir(&"1.1.0");
    assert_eq!(
        std::fs::read(version_dir.join("MyApp.exe")).expect("exe should be installed"),
        exe_contents("1.1.0")
    );
    assert!(!fixture.paths.version_dir(&"1.0.0").exists());
    #[cfg(unix)]
    assert_eq!(executables, [version_dir.join("MyApp.exe")]);
    #[cfg(not(unix))]
    assert!(!executables.is_empty());

    assert_eq!(common::drain(&mut receiver).last(), Some(&100));
}

#[tokio::test]
async fn unreachable_remote_keeps_the_bundled_release() {
    let fixture = Fixture::new();
    let bundled = fixture.temp.path().join("bundled");
    fixture.publish_to(&bundled, "1.0.0");

    let installer = Installer::new(fixture.paths.clone(), &bundled, fixture.options())
        .with_remote(UpdateSource::Directory(fixture.temp.path().join("missing")));

    let executables = installer
        .execute_install(&ProgressReporter::silent())
        .await
        .expect("bundled install should succeed");

    assert!(fixture.paths.version_dir(&"1.0.0").join("MyApp.exe").is_file());
    assert!(
        executables
            .iter()
            .all(|path| path.starts_with(fixture.paths.version_dir(&"1.0.0")))
    );
}

#[tokio::test]
async fn reinstall_reports_the_current_executables() {
    let fixture = Fixture::new();
    let bundled = fixture.temp.path().join("bundled");
    fixture.publish_to(&bundled, "1.0.0");
    let installer = Installer::new(fixture.paths.clone(), &bundled, fixture.options());

    let first = installer
        .execute_install(&ProgressReporter::silent())
        .await
        .expect("install should succeed");
    let second = installer
        .execute_install(&ProgressReporter::silent())
        .await
        .expect("reinstall should succeed");

    assert_eq!(first, second);
}

#[tokio::test]
async fn uninstall_removes_the_installation() {
    let fixture = Fixture::new();
    let bundled = fixture.temp.path().join("bundled");
    fixture.publish_to(&bundled, "1.0.0");
    let installer = Installer::new(fixture.paths.clone(), &bundled, fixture.options());
    installer
        .execute_install(&ProgressReporter::silent())
        .await
        .expect("install should succeed");

    let removal = installer
        .execute_uninstall()
        .await
        .expect("uninstall should succeed");

    assert_eq!(removal, Removal::Removed);
    assert!(!fixture.paths.app_root.exists());
    assert!(!fixture.desktop_link().exists());
}

#[tokio::test]
async fn corrupt_remote_delta_falls_back_to_the_full_release() {
    let fixture = Fixture::new();
    let bundled = fixture.temp.path().join("bundled");
    let remote = fixture.temp.path().join("remote");
    fixture.publish_to(&bundled, "1.0.0");
    fixture.publish_to(&remote, "1.0.0");
    let published = fixture.publish_to(&remote, "1.1.0");
    let delta = published.delta.expect("1.1.0 should ship a delta");
    let delta_path = remote.join(delta.filename());
    let size = std::fs::metadata(&delta_path).expect("delta should exist").len();
    std::fs::write(&delta_path, vec![0_u8; usize::try_from(size).expect("size should fit")])
        .expect("delta should be overwritten");

    let installer = Installer::new(fixture.paths.clone(), &bundled, fixture.options())
        .with_remote(UpdateSource::Directory(remote));
    let (progress, mut receiver) = ProgressReporter::channel();

    installer
        .execute_install(&progress)
        .await
        .expect("install should recover through the full release");

    assert_eq!(
        std::fs::read(fixture.paths.version_dir(&"1.1.0").join("MyApp.exe"))
            .expect("exe should be installed"),
        exe_contents("1.1.0")
    );
    assert!(fixture.paths.package_file("MyApp-1.1.0-full.nupkg").is_file());
    assert!(!fixture.paths.package_file(delta.filename()).exists());

    let reported = common::drain(&mut receiver);
    assert!(reported.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(reported.last(), Some(&100));
}
