// Shared fixtures for integration tests
#![allow(dead_code)]

use libris_core::{Book, MemoryDatabase, QueryFacade};

pub const BOOKS: &str = "books";

/// Install a subscriber once; `RUST_LOG=libris_core=debug` shows request logs
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn sample_books() -> Vec<Book> {
    vec![
        Book::new("To Kill a Mockingbird", "Harper Lee", "Fiction", 1960, 12.99, true),
        Book::new("1984", "George Orwell", "Dystopian", 1949, 10.99, true),
        Book::new("The Great Gatsby", "F. Scott Fitzgerald", "Fiction", 1925, 9.99, true),
        Book::new("Brave New World", "Aldous Huxley", "Dystopian", 1932, 11.50, false),
        Book::new("The Hobbit", "J.R.R. Tolkien", "Fantasy", 1937, 14.99, true),
        Book::new("The Catcher in the Rye", "J.D. Salinger", "Fiction", 1951, 8.99, true),
        Book::new("Pride and Prejudice", "Jane Austen", "Romance", 1813, 7.99, true),
        Book::new("The Lord of the Rings", "J.R.R. Tolkien", "Fantasy", 1954, 19.99, true),
        Book::new("Animal Farm", "George Orwell", "Political Satire", 1945, 8.50, false),
        Book::new("The Alchemist", "Paulo Coelho", "Fiction", 1988, 10.99, true),
        Book::new("Moby Dick", "Herman Melville", "Adventure", 1851, 12.50, false),
        Book::new("Wuthering Heights", "Emily Brontë", "Gothic", 1847, 10.00, true),
        Book::new("The Martian", "Andy Weir", "Science Fiction", 2011, 15.99, true),
        Book::new("Circe", "Madeline Miller", "Fantasy", 2018, 16.50, false),
        Book::new("Project Hail Mary", "Andy Weir", "Science Fiction", 2021, 18.99, true),
        Book::new("The Midnight Library", "Matt Haig", "Fiction", 2020, 13.99, true),
    ]
}

/// Façade over a fresh in-memory database seeded with `sample_books`
pub fn seeded_facade() -> QueryFacade<MemoryDatabase> {
    init_tracing();
    let facade = QueryFacade::new(MemoryDatabase::new());
    facade.insert_books(BOOKS, &sample_books()).unwrap();
    facade
}
