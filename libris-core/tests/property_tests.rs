// Property-based tests using proptest
use libris_core::{
    Book, DatabaseHandle, Filter, FindOptions, IndexSpec, MemoryDatabase, Page, Projection, QueryFacade,
    SortDirection, SortSpec,
};
use proptest::prelude::*;

const BOOKS: &str = "books";

prop_compose! {
    fn arb_book()(
        title in "[A-Z][a-z]{2,12}",
        author in prop::sample::select(vec!["Ada", "Borges", "Calvino", "Dumas", "Eco"]),
        genre in prop::sample::select(vec!["Fiction", "Fantasy", "History"]),
        published_year in -500i64..2030,
        cents in 0u32..5000,
        in_stock in any::<bool>(),
    ) -> Book {
        Book::new(title, author, genre, published_year, f64::from(cents) / 100.0, in_stock)
    }
}

fn facade_with(books: &[Book]) -> QueryFacade<MemoryDatabase> {
    let facade = QueryFacade::new(MemoryDatabase::new());
    facade.insert_books(BOOKS, books).unwrap();
    facade
}

// ========== PROPERTY 1: Pages partition the sorted collection ==========

proptest! {
    #[test]
    fn prop_pages_are_disjoint_and_contiguous(
        books in prop::collection::vec(arb_book(), 0..40),
        page_size in 1usize..8,
    ) {
        let facade = facade_with(&books);
        let sort = SortSpec::ascending("price");
        let projection = Projection::include(["title", "price"]);

        let all = facade.sorted_by_price(BOOKS, SortDirection::Ascending, Some(&projection)).unwrap();

        let mut paged = Vec::new();
        for page_number in 0..3 {
            let page = Page::new(page_size, page_number).unwrap();
            let rows = facade.sorted_page(BOOKS, &sort, page, Some(&projection)).unwrap();
            prop_assert!(rows.len() <= page_size);
            paged.extend(rows);
        }

        let expected: Vec<_> = all.into_iter().take(3 * page_size).collect();
        prop_assert_eq!(paged, expected);
    }
}

// ========== PROPERTY 2: Index choice never changes results ==========

proptest! {
    #[test]
    fn prop_index_does_not_change_results(
        books in prop::collection::vec(arb_book(), 0..40),
        author in prop::sample::select(vec!["Ada", "Borges", "Calvino", "Dumas", "Eco"]),
        after_year in -500i64..2030,
        sort_field in prop::sample::select(vec!["published_year", "author", "title"]),
        descending in any::<bool>(),
    ) {
        let db = MemoryDatabase::new();
        let docs = books.iter().map(|b| b.to_value().unwrap()).collect();
        db.insert_many(BOOKS, docs).unwrap();

        let direction = if descending { SortDirection::Descending } else { SortDirection::Ascending };
        let filter = Filter::new().eq("author", author).gt("published_year", after_year);
        let options = FindOptions::new()
            .with_sort(SortSpec::new().then(sort_field, direction))
            .with_projection(Projection::include(["title", "published_year"]));

        let before = db.execute(BOOKS, &filter, &options).unwrap();
        db.create_index(BOOKS, &IndexSpec::ascending("author").then("published_year", SortDirection::Descending)).unwrap();
        let after = db.execute(BOOKS, &filter, &options).unwrap();

        prop_assert_eq!(before, after);
    }
}

// ========== PROPERTY 3: Genre averages are ordered ==========

proptest! {
    #[test]
    fn prop_average_price_rows_non_increasing(books in prop::collection::vec(arb_book(), 1..40)) {
        let facade = facade_with(&books);
        let rows = facade.average_price_by_genre(BOOKS).unwrap();

        prop_assert!(rows.windows(2).all(|w| w[0].average_price >= w[1].average_price));
        prop_assert_eq!(rows.iter().map(|r| r.count).sum::<u64>(), books.len() as u64);
    }
}

// ========== PROPERTY 4: Decades floor toward negative infinity ==========

proptest! {
    #[test]
    fn prop_decade_contains_year(books in prop::collection::vec(arb_book(), 1..30)) {
        // Unique titles so each summary maps back to one book
        let books: Vec<Book> = books.into_iter()
            .enumerate()
            .map(|(i, mut book)| {
                book.title = format!("{} {}", book.title, i);
                book
            })
            .collect();
        let facade = facade_with(&books);
        let buckets = facade.books_by_decade(BOOKS).unwrap();

        prop_assert!(buckets.windows(2).all(|w| w[0].decade < w[1].decade));
        for bucket in &buckets {
            prop_assert_eq!(bucket.decade.rem_euclid(10), 0);
            prop_assert_eq!(bucket.books.len() as u64, bucket.book_count);
            for summary in &bucket.books {
                let book = books.iter()
                    .find(|b| b.title == summary.title && b.author == summary.author)
                    .unwrap();
                prop_assert!(bucket.decade <= book.published_year);
                prop_assert!(book.published_year < bucket.decade + 10);
            }
        }
    }
}

// ========== PROPERTY 5: Filter JSON is equivalent to the built filter ==========

proptest! {
    #[test]
    fn prop_filter_json_matches_same_books(
        books in prop::collection::vec(arb_book(), 0..30),
        in_stock in any::<bool>(),
        after_year in -500i64..2030,
        max_price in 0.0f64..60.0,
    ) {
        let filter = Filter::new()
            .eq("in_stock", in_stock)
            .gt("published_year", after_year)
            .lte("price", max_price);
        let reparsed = Filter::from_json(&filter.to_json()).unwrap();

        for book in &books {
            let doc = book.to_value().unwrap();
            prop_assert_eq!(filter.matches(&doc), reparsed.matches(&doc));
        }
    }
}
