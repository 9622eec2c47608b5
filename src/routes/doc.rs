use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{ApiKey, ApiKeyValue, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        addresses::{AddressList, CreateAddressRequest, UpdateAddressRequest},
        admin::{
            CustomerList, CustomerSummary, DailySales, DashboardStats, SalesReport,
            StatusBreakdown, TopProduct, UpdateOrderStatusRequest,
        },
        auth::{
            AuthResponse, GoogleLoginRequest, LoginRequest, OtpSentResponse, RegisterRequest,
            SendOtpRequest, UpdateProfileRequest, VerifyOtpRequest,
        },
        cart::{AddToCartRequest, UpdateCartItemRequest},
        categories::{CategoryList, CreateCategoryRequest, UpdateCategoryRequest},
        orders::{
            OrderList, OrderWithItems, PaymentInfoInput, PaymentIntentResponse, PaymentMethod,
            PlaceOrderRequest, ShippingInfo, ShippingInfoInput,
        },
        products::{
            CreateProductRequest, CreateReviewRequest, ProductList, ReviewList,
            UpdateProductRequest,
        },
    },
    models::{
        Address, Cart, CartItem, Category, Order, OrderItem, OrderStatus, PaymentStatus, Product,
        Review, User,
    },
    response::{ApiResponse, Meta},
    routes::{
        addresses, admin, auth, cart, categories, health, orders, params, payments, products,
    },
    session::SESSION_COOKIE,
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "cookie_auth",
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(SESSION_COOKIE))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        auth::logout,
        auth::me,
        auth::update_me,
        auth::send_otp,
        auth::verify_otp,
        auth::google,
        products::list_products,
        products::get_product,
        products::list_reviews,
        products::create_review,
        categories::list_categories,
        cart::get_cart,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_cart_item,
        cart::clear_cart,
        orders::list_orders,
        orders::place_order,
        orders::get_order,
        payments::create_payment_intent,
        addresses::list_addresses,
        addresses::create_address,
        addresses::update_address,
        addresses::delete_address,
        addresses::set_default_address,
        admin::list_products,
        admin::create_product,
        admin::update_product,
        admin::delete_product,
        admin::list_categories,
        admin::create_category,
        admin::update_category,
        admin::delete_category,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::list_customers,
        admin::dashboard,
        admin::reports
    ),
    components(
        schemas(
            User,
            Product,
            Category,
            Review,
            Cart,
            CartItem,
            Order,
            OrderItem,
            OrderStatus,
            PaymentStatus,
            Address,
            RegisterRequest,
            LoginRequest,
            GoogleLoginRequest,
            SendOtpRequest,
            VerifyOtpRequest,
            UpdateProfileRequest,
            OtpSentResponse,
            AuthResponse,
            AddToCartRequest,
            UpdateCartItemRequest,
            ShippingInfoInput,
            ShippingInfo,
            PaymentMethod,
            PaymentInfoInput,
            PlaceOrderRequest,
            PaymentIntentResponse,
            OrderWithItems,
            OrderList,
            CreateProductRequest,
            UpdateProductRequest,
            ProductList,
            CreateReviewRequest,
            ReviewList,
            CreateCategoryRequest,
            UpdateCategoryRequest,
            CategoryList,
            CreateAddressRequest,
            UpdateAddressRequest,
            AddressList,
            UpdateOrderStatusRequest,
            CustomerSummary,
            CustomerList,
            DashboardStats,
            DailySales,
            StatusBreakdown,
            TopProduct,
            SalesReport,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            params::CustomerQuery,
            params::ReportQuery,
            Meta,
            ApiResponse<User>,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<Cart>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Sign-up, sign-in and profile endpoints"),
        (name = "Products", description = "Catalog and review endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Checkout and order history endpoints"),
        (name = "Addresses", description = "Saved shipping addresses"),
        (name = "Admin", description = "Store management endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
