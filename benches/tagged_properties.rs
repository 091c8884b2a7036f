#![allow(unused)]
extern crate pkgscope;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use pkgscope::{
    file::writer::Writer,
    package::{header::FILE_VERSION_CURRENT, name::NameMapBuilder},
    prelude::*,
};
use std::hint::black_box;

const EXPORTS: u32 = 256;

fn register(session: &mut LoadSession) -> ClassId {
    let vector = session
        .register_class(
            ClassBuilder::new_struct("Vector")
                .package("Engine")
                .field("X", PropertyKind::Float)
                .field("Y", PropertyKind::Float)
                .field("Z", PropertyKind::Float),
        )
        .unwrap();
    session
        .register_class(
            ClassBuilder::new("Actor")
                .package("Engine")
                .field("Health", PropertyKind::Int)
                .field("Label", PropertyKind::Str)
                .field("Location", PropertyKind::Struct(vector))
                .field("Owner", PropertyKind::Object)
                .field(
                    "Children",
                    PropertyKind::Array(Box::new(PropertyKind::Object)),
                )
                .static_array("Weights", PropertyKind::Double, 4),
        )
        .unwrap()
}

fn actor_values(i: u32) -> PropertyBag {
    let location = PropertyBag::from_slots(vec![
        vec![PropertyValue::Float(i as f32)],
        vec![PropertyValue::Float(2.0)],
        vec![PropertyValue::Float(-1.0)],
    ]);
    let owner = if i == 0 { PackageIndex::Root } else { PackageIndex::Export(i - 1) };
    PropertyBag::from_slots(vec![
        vec![PropertyValue::Int(i as i32)],
        vec![PropertyValue::Str(format!("Actor {i}"))],
        vec![PropertyValue::Struct(location)],
        vec![PropertyValue::Object(owner)],
        vec![PropertyValue::Array(
            (0..i.min(8)).map(|c| PropertyValue::Object(PackageIndex::Export(c))).collect(),
        )],
        (0..4).map(|w| PropertyValue::Double(f64::from(w) * 0.25)).collect(),
    ])
}

fn level_image(session: &mut LoadSession, actor: ClassId) -> Vec<u8> {
    let defaults = session.classes().defaults(actor).unwrap().clone();
    let mut builder = session.package_builder();
    let class = builder.import_class("Engine", "Actor");
    for i in 0..EXPORTS {
        let export = builder.export_object(&format!("Actor_{i}"), class, PackageIndex::Root);
        builder
            .set_properties(export, actor, &actor_values(i), &defaults)
            .unwrap();
    }
    builder.build().unwrap()
}

/// Benchmark encoding one object with every kind of field set
fn bench_serialize(c: &mut Criterion) {
    let mut session = LoadSession::new(LoadConfig::default());
    let actor = register(&mut session);
    let defaults = session.classes().defaults(actor).unwrap().clone();
    let values = actor_values(7);

    c.bench_function("tagged_serialize", |b| {
        b.iter(|| {
            let mut writer = Writer::new();
            let mut map = NameMapBuilder::new(FILE_VERSION_CURRENT);
            TaggedCodec::new(session.classes(), session.names())
                .serialize(&mut writer, &mut map, actor, black_box(&values), &defaults)
                .unwrap();
            black_box(writer.into_inner())
        });
    });
}

/// Benchmark the reference pre-scan used by dependency gathering
fn bench_scan_references(c: &mut Criterion) {
    let mut session = LoadSession::new(LoadConfig::default());
    let actor = register(&mut session);
    let image = level_image(&mut session, actor);
    let level = session.open_package_from_memory("Level", image).unwrap();
    let linker = session.linker(level).unwrap();
    let data = linker.export_data(EXPORTS - 1).unwrap().into_owned();

    let mut group = c.benchmark_group("tagged_scan");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("scan_references", |b| {
        b.iter(|| {
            let refs = TaggedCodec::scan_references(&mut Parser::new(black_box(&data)), linker.names())
                .unwrap();
            black_box(refs)
        });
    });
    group.finish();
}

/// Benchmark opening a package and resolving every export, uncompressed and compressed
fn bench_load_package(c: &mut Criterion) {
    let mut writer = LoadSession::new(LoadConfig::default());
    let actor = register(&mut writer);
    let plain = level_image(&mut writer, actor);

    let mut packer = LoadSession::new(LoadConfig::compressed(CompressionPolicy::BiasSpeed));
    register(&mut packer);
    let level = packer.open_package_from_memory("Level", plain.clone()).unwrap();
    let packed = packer.save_package_to_vec(level).unwrap();

    let mut group = c.benchmark_group("load_package");
    for (label, image) in [("uncompressed", &plain), ("compressed", &packed)] {
        group.throughput(Throughput::Bytes(image.len() as u64));
        group.bench_function(label, |b| {
            b.iter(|| {
                let mut session = LoadSession::new(LoadConfig::default());
                register(&mut session);
                let level = session
                    .open_package_from_memory("Level", black_box(image.clone()))
                    .unwrap();
                session.begin_load();
                for i in 0..EXPORTS {
                    session.resolve(level, PackageIndex::Export(i)).unwrap();
                }
                session.end_load().unwrap();
                black_box(session.stats())
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_serialize,
    bench_scan_references,
    bench_load_package
);
criterion_main!(benches);
