#![no_main]

use libfuzzer_sys::fuzz_target;
use pkgscope::prelude::*;

fuzz_target!(|data: &[u8]| {
    let mut session = LoadSession::new(LoadConfig::default());
    let Ok(linker) = session.open_package_from_memory("Fuzz", data.to_vec()) else {
        return;
    };

    let exports = session.linker(linker).map_or(0, |l| l.exports().len() as u32);
    for i in 0..exports {
        let root = DependencyRef::new(linker, PackageIndex::Export(i));
        let _ = session.gather_dependencies(root, &DependencyOptions::default());
        let _ = session.resolve(linker, PackageIndex::Export(i));
    }
    let _ = session.save_package_to_vec(linker);
});
