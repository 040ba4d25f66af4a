use criterion::{black_box, criterion_group, criterion_main, Criterion};
use farcall::Message;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct Age(i32);

const AGE: Age = Age(10);

#[derive(Serialize, Deserialize)]
struct Login {
    username: &'static str,
    password: &'static str,
    remember: bool,
}

const LOGIN: Login = Login {
    username: "johndoe@gmail.com",
    password: "JohnTheGod",
    remember: true,
};

#[derive(Serialize, Deserialize)]
struct User {
    name: &'static str,
    age: i32,
    verified: bool,
    bio: &'static str,
    friends: [i32; 8],
}

const USER: User = User {
    name: "johndoe",
    age: 32,
    verified: true,
    bio: "long enough to not be trivially small, short enough to not be a large payload",
    friends: [1, 2, 3, 4, 5, 6, 7, 8],
};

fn encode_benchmark(c: &mut Criterion) {
    c.bench_function("encode_small", |b| {
        b.iter(|| black_box(Message::encode(&AGE).unwrap()))
    });
    c.bench_function("encode_medium", |b| {
        b.iter(|| black_box(Message::encode(&LOGIN).unwrap()))
    });
    c.bench_function("encode_large", |b| {
        b.iter(|| black_box(Message::encode(&USER).unwrap()))
    });
}

fn decode_benchmark(c: &mut Criterion) {
    let small = Message::encode(&AGE).unwrap();
    let medium = Message::encode(&LOGIN).unwrap();
    let large = Message::encode(&USER).unwrap();

    c.bench_function("decode_small", |b| {
        b.iter(|| black_box(small.decode::<Age>().unwrap()))
    });
    c.bench_function("decode_medium", |b| {
        b.iter(|| black_box(medium.decode::<Login>().unwrap()))
    });
    c.bench_function("decode_large", |b| {
        b.iter(|| black_box(large.decode::<User>().unwrap()))
    });
}

criterion_group!(benches, encode_benchmark, decode_benchmark);
criterion_main!(benches);
