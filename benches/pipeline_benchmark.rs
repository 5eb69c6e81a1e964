use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use etlstream::config::PoolConfig;
use etlstream::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn bench_schema() -> SchemaRef {
    Schema::builder()
        .field("id", FieldType::Int64)
        .string_field("name", 32)
        .field("age", FieldType::Int32)
        .field("active", FieldType::Boolean)
        .build()
        .unwrap()
        .into_ref()
}

fn fill_row(index: u64, record: &mut Record<'_>) -> Result<()> {
    record.set_value("id", FieldValue::from_int64(index as i64))?;
    record.set_value("name", FieldValue::from(format!("User{}", index)))?;
    record.set_value("age", FieldValue::from_int32(20 + (index % 50) as i32))?;
    record.set_value("active", FieldValue::from_boolean(index % 2 == 0))
}

fn benchmark_record_access(c: &mut Criterion) {
    let pool = RecordBufferPool::new(&PoolConfig::default());
    let schema = bench_schema();

    c.bench_function("record_set_get", |b| {
        let mut record = PooledRecord::rent(&pool, SchemaRef::clone(&schema)).unwrap();
        let mut index = 0u64;
        b.iter(|| {
            fill_row(index, &mut record.record()).unwrap();
            index += 1;
            let view = record.view();
            black_box(view.get_value("age").unwrap().as_int32().unwrap());
            black_box(view.get_value("name").unwrap().as_string().unwrap().map(str::len));
        })
    });
}

fn benchmark_pool(c: &mut Criterion) {
    let pool = RecordBufferPool::new(&PoolConfig::default());
    let schema = bench_schema();
    pool.prewarm(schema.buffer_size(), 16).unwrap();

    c.bench_function("pool_rent_release", |b| {
        b.iter(|| {
            let record = PooledRecord::rent(&pool, SchemaRef::clone(&schema)).unwrap();
            black_box(record.view().len());
        })
    });
}

fn benchmark_pipeline_throughput(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("pipeline_throughput");

    for rows in [1_000u64, 10_000] {
        group.throughput(Throughput::Elements(rows));

        group.bench_with_input(BenchmarkId::new("identity", rows), &rows, |b, &rows| {
            let loader = MemoryLoader::new();
            let pipeline = Pipeline::builder()
                .extract(
                    FnExtractor::new(bench_schema(), move |index, record| {
                        if index >= rows {
                            return Ok(false);
                        }
                        fill_row(index, record)?;
                        Ok(true)
                    })
                    .with_total(rows),
                )
                .load(loader.clone())
                .build()
                .unwrap();

            b.iter(|| {
                loader.clear();
                let result = runtime.block_on(pipeline.execute()).unwrap();
                black_box(result.rows_loaded);
            })
        });

        group.bench_with_input(BenchmarkId::new("filter_batched", rows), &rows, |b, &rows| {
            let loader = MemoryLoader::new();
            let pipeline = Pipeline::builder()
                .extract(FnExtractor::new(bench_schema(), move |index, record| {
                    if index >= rows {
                        return Ok(false);
                    }
                    fill_row(index, record)?;
                    Ok(true)
                }))
                .transform(FilterTransform::new(|row| {
                    Ok(row.get_value("age")?.as_int32()?.unwrap_or(0) >= 30)
                }))
                .load(loader.clone())
                .load_batch_size(256)
                .load_workers(2)
                .build()
                .unwrap();

            b.iter(|| {
                loader.clear();
                let result = runtime.block_on(pipeline.execute()).unwrap();
                black_box(result.rows_loaded);
            })
        });
    }

    group.finish();
}

fn benchmark_csv_processing(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    // Cria arquivo CSV temporário com 1000 linhas
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "id,name,age,active").unwrap();
    for i in 0..1000 {
        writeln!(temp_file, "{},User{},{},true", i, i, 20 + (i % 50)).unwrap();
    }

    let pipeline = Pipeline::builder()
        .extract(CsvExtractor::new(temp_file.path(), bench_schema()))
        .load(MemoryLoader::new())
        .build()
        .unwrap();

    c.bench_function("csv_pipeline_1000_rows", |b| {
        b.iter(|| {
            let result = runtime.block_on(pipeline.execute()).unwrap();
            black_box(result);
        })
    });
}

criterion_group!(
    benches,
    benchmark_record_access,
    benchmark_pool,
    benchmark_pipeline_throughput,
    benchmark_csv_processing
);
criterion_main!(benches);
